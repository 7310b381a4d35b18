#[tokio::main]
async fn main() {
    if let Err(e) = verities_lib::run().await {
        eprintln!("verities: {e}");
        std::process::exit(1);
    }
}
