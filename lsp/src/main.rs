#[tokio::main]
async fn main() {
    loupe_lsp::server::run().await;
}
