mod backfill;
mod binance;
mod candle;
mod cleaner;
mod config;
mod cryptocompare;
mod kucoin;
mod writer;

use dotenv::dotenv;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = config::Settings::from_env();
    std::fs::create_dir_all(&settings.output_dir)?;

    // Step 1: CryptoCompare history (supply-based caps)
    println!("\n--- Step 1: Fetching CryptoCompare Candles ---");
    if let Err(e) = cryptocompare::run(&settings).await {
        eprintln!("Error fetching from CryptoCompare: {}", e);
    }

    // Step 2: Binance history
    println!("\n--- Step 2: Fetching Binance Candles ---");
    if let Err(e) = binance::run(&settings).await {
        eprintln!("Error fetching from Binance: {}", e);
    }

    // Step 3: KuCoin history
    println!("\n--- Step 3: Fetching KuCoin Candles ---");
    if let Err(e) = kucoin::run(&settings).await {
        eprintln!("Error fetching from KuCoin: {}", e);
    }

    // Step 4: Normalize, dedupe and filter the raw files
    println!("\n--- Step 4: Cleaning Output Files ---");
    if let Err(e) = cleaner::run(&settings.output_dir, &settings.cleaned_dir) {
        eprintln!("Error cleaning files: {}", e);
    }

    println!(
        "\nToken files saved in {:?}, cleaned copies in {:?}.",
        settings.output_dir, settings.cleaned_dir
    );
    Ok(())
}
