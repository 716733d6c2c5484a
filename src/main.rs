fn main() {
    if let Err(err) = crump::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
