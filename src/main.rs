//! mxcp-gateway CLI — run with `mxcp-gateway <command>`.

#[tokio::main]
async fn main() {
    mxcp_gateway::init_logging();

    if let Err(e) = mxcp_gateway::cli::run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
