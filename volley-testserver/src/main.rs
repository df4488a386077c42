use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;

/// Book-catalog service for exercising volley scenarios locally.
///
/// Prints `BASE_URL=<url>` to stdout once it accepts connections.
#[derive(Debug, Parser)]
#[command(name = "volley-testserver", version)]
struct Args {
    /// Listen address; port 0 picks a free port
    #[arg(long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,

    /// Answer every `POST /api/v1/books` with 500
    #[arg(long)]
    fail_creates: bool,

    /// Books to add before serving, so read-heavy scenarios have data
    #[arg(long, default_value_t = 0)]
    seed_books: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let library = volley_testserver::Library::default();
    for n in 1..=args.seed_books {
        library.add_book(format!("Seed Book {n}"), format!("Seed Author {n}"));
    }
    library.set_fail_creates(args.fail_creates);

    let listener = TcpListener::bind(args.bind).await?;
    let addr = listener.local_addr()?;
    println!("BASE_URL=http://{addr}");

    axum::serve(listener, volley_testserver::router(library))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
