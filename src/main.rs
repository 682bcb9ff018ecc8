use std::process;

fn main() {
    if let Err(err) = tbsync::app::run() {
        eprintln!("fatal: {err:#}");
        process::exit(1);
    }
}
