#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    transit_server::run().await
}
