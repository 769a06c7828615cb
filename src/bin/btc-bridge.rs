//! Bitcoin Bridge Operator CLI
//!
//! Inspects the Bitcoin chain the way the bridge sees it.
//!
//! Usage:
//!   btc-bridge tip
//!   btc-bridge header <height>
//!   btc-bridge decode <tx-hex>
//!   btc-bridge proof <txid> <required-confirmations>

use btc_bridge::bitcoin::ByteOrder;
use btc_bridge::logging::init_from_config;
use btc_bridge::{
    assemble_spv_proof, BitcoinChain, BridgeConfig, BridgeError, EsploraClient, Hash, Transaction,
};
use std::env;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let result = match args[1].as_str() {
        "tip" => cmd_tip().await,
        "header" => cmd_header(&args[2..]).await,
        "decode" => cmd_decode(&args[2..]),
        "proof" => cmd_proof(&args[2..]).await,
        "config" => cmd_config(),
        _ => {
            print_usage();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error [{}]: {}", e.error_code(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!("Bitcoin Bridge - Operator CLI");
    println!();
    println!("Usage:");
    println!("  btc-bridge tip                                   Print the chain tip height");
    println!("  btc-bridge header <height>                       Print a block header");
    println!("  btc-bridge decode <tx-hex>                       Decode a raw transaction");
    println!("  btc-bridge proof <txid> <confirmations>          Assemble an SPV proof");
    println!("  btc-bridge config                                Print the configuration");
    println!();
    println!("Environment:");
    println!("  BTC_BRIDGE_NETWORK      mainnet, testnet or regtest");
    println!("  BTC_BRIDGE_ESPLORA_URL  Esplora API URL");
    println!("  BTC_BRIDGE_LOG_LEVEL    Log level");
}

fn client() -> Result<EsploraClient, BridgeError> {
    let config = BridgeConfig::from_env()?;
    // A subscriber may already be installed; logging is best effort here.
    if let Err(e) = init_from_config(&config) {
        eprintln!("Warning: {}", e);
    }
    Ok(EsploraClient::new(&config.esplora_url))
}

fn arg<'a>(args: &'a [String], index: usize, usage: &str) -> Result<&'a str, BridgeError> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| BridgeError::validation(format!("usage: btc-bridge {}", usage)))
}

async fn cmd_tip() -> Result<(), BridgeError> {
    let height = client()?.get_latest_block_height().await?;
    println!("{}", height);
    Ok(())
}

async fn cmd_header(args: &[String]) -> Result<(), BridgeError> {
    let height: u64 = arg(args, 0, "header <height>")?
        .parse()
        .map_err(|_| BridgeError::validation("height must be a number"))?;

    let header = client()?.get_block_header(height).await?;

    let json = serde_json::json!({
        "height": height,
        "hash": header.hash().to_hex(ByteOrder::Reversed),
        "header": header,
        "raw": hex::encode(header.serialize()),
        "difficulty": header.difficulty().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
    Ok(())
}

fn cmd_decode(args: &[String]) -> Result<(), BridgeError> {
    let transaction = Transaction::from_hex(arg(args, 0, "decode <tx-hex>")?)?;

    println!("txid:    {}", transaction.hash());
    println!("wtxid:   {}", transaction.witness_hash());
    println!("witness: {}", transaction.is_witness());
    println!("inputs:  {}", transaction.inputs.len());
    for input in &transaction.inputs {
        println!(
            "  {}:{}",
            input.outpoint.transaction_hash, input.outpoint.output_index
        );
    }
    println!("outputs: {}", transaction.outputs.len());
    for output in &transaction.outputs {
        println!(
            "  {} sats -> {}",
            output.value,
            hex::encode(&output.public_key_script)
        );
    }
    Ok(())
}

async fn cmd_proof(args: &[String]) -> Result<(), BridgeError> {
    let usage = "proof <txid> <required-confirmations>";
    let transaction_hash = Hash::from_hex(arg(args, 0, usage)?, ByteOrder::Reversed)?;
    let required_confirmations: u64 = arg(args, 1, usage)?
        .parse()
        .map_err(|_| BridgeError::validation("required confirmations must be a number"))?;

    let client = client()?;
    let (transaction, proof) =
        assemble_spv_proof(&transaction_hash, required_confirmations, &client).await?;

    let json = serde_json::json!({
        "transaction": transaction.to_hex(),
        "proof": proof,
    });
    println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
    Ok(())
}

fn cmd_config() -> Result<(), BridgeError> {
    BridgeConfig::from_env()?.print_summary();
    Ok(())
}
