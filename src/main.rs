#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wakecycle::run().await
}
