use std::process::exit;

#[tokio::main]
async fn main() {
    if let Err(e) = server::start_server().await {
        eprintln!("Server failed: {e}");
        exit(1);
    }
}
