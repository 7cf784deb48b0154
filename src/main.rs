use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    netloom_lib::run().await
}
