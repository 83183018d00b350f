fn main() {
    if let Err(err) = loanscope::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
