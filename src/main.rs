fn main() {
    if let Err(err) = directory_sync::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
