use collector::runtime::{boot, serve};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    boot::init_logging();
    let (state, writer) = boot::boot().await?;
    serve::serve(state, writer).await?;
    Ok(())
}
