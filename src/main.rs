use rforth1::config::Config;

fn main() {
    let config = Config::parse_args();
    std::process::exit(rforth1::run(&config));
}
