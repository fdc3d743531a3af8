//! # Outlet Catalog Live Data Test
//!
//! Fetches the live outlet catalog once through `lib_common` and prints what
//! the bot would see, optionally narrowed to titles containing a query.

use clap::Parser;
use lib_common::catalog::{CatalogClient, DEFAULT_API_URI, DEFAULT_ITEM_URL_BASE};
use lib_common::retrieve::ky_http::DEFAULT_TIMEOUT;

#[derive(Parser, Debug)]
#[clap(about = "Fetch the live outlet catalog once and print it")]
struct Args {
    #[clap(long, default_value = DEFAULT_API_URI, help = "Outlet search endpoint.")]
    api_uri: String,

    #[clap(long, help = "Only print items whose title contains this text.")]
    query: Option<String>,

    #[clap(long, default_value_t = 20, help = "Maximum items to print.")]
    limit: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let client = CatalogClient::new(&args.api_uri, DEFAULT_TIMEOUT)?;
    println!("[*] Requesting live catalog...");

    let catalog = match client.fetch_catalog().await {
        Ok(catalog) => catalog,
        Err(e) => {
            // // Statement: Failure - Print specific error details to stderr
            eprintln!("\n[ERROR] Catalog retrieval failed:");
            eprintln!(">>> {}", e);
            std::process::exit(1);
        }
    };

    let needle = args.query.as_deref().map(str::to_lowercase);
    let mut items: Vec<_> = catalog
        .iter()
        .filter(|item| needle.as_ref().is_none_or(|n| item.title.to_lowercase().contains(n)))
        .collect();
    items.sort_by(|a, b| a.title.cmp(&b.title));

    println!("\n[SUCCESS] {} items in catalog, {} matching", catalog.len(), items.len());
    println!("-----------------------------------------------");
    for item in items.iter().take(args.limit) {
        println!("{:<14} {}", item.key.0, item.blurb());
        println!("{:<14} {}", "", item.url(DEFAULT_ITEM_URL_BASE));
    }
    println!("-----------------------------------------------");

    Ok(())
}
