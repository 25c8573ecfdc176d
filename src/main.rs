//! packdag node binary.
//!
//! Usage:
//!   packdag keygen                      # create (or show) the node key
//!   packdag init                        # write genesis from packdag.toml
//!   packdag pay --to <hex> --amount N   # build and sign a payment pack
//!   packdag submit <hex-file>           # admit an encoded pack
//!   packdag pack <hash>                 # show a stored pack
//!   packdag balance <address> [token]
//!   packdag leaves | stabilizers | state-hash
//!   packdag run                         # node loop, hex packs on stdin

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use num_bigint::BigUint;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use packdag::config::Config;
use packdag::consensus::Engine;
use packdag::constants::BASE_TOKEN;
use packdag::network::{LoopbackTransport, NullTransport};
use packdag::node::{init_genesis, load_or_generate_keypair, open_ledger, Node};
use packdag::pack::Pack;
use packdag::{decode_hash, encode_hash, Address};

/// Single-node DAG ledger with stabilizer finality and a bytecode VM.
#[derive(Parser, Debug)]
#[command(name = "packdag", version, about = "DAG ledger node")]
struct Cli {
    /// Data directory for the key, config and database.
    #[arg(long, default_value = "./packdag-data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the node key if missing and print its public key and address.
    Keygen,

    /// Initialize the ledger from the genesis section of the config.
    Init,

    /// Build and sign a base-token payment from the node key, printed as hex.
    Pay {
        /// Recipient address (hex).
        #[arg(long)]
        to: String,

        /// Amount in base units.
        #[arg(long)]
        amount: String,
    },

    /// Admit a hex-encoded pack read from a file.
    Submit { file: PathBuf },

    /// Print a stored pack as JSON.
    Pack {
        /// Pack hash (base64url).
        hash: String,
    },

    /// Print a balance.
    Balance {
        /// Address (hex).
        address: String,

        /// Token hash (base64url). Defaults to the base token.
        token: Option<String>,
    },

    /// List the current DAG leaves.
    Leaves,

    /// List the stabilizer set.
    Stabilizers,

    /// Print the digest over all permanent packs.
    StateHash,

    /// Run the node; hex-encoded packs are read line by line from stdin.
    Run,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.data_dir);

    match cli.command {
        Command::Keygen => {
            let keypair = load_or_generate_keypair(&cli.data_dir)?;
            println!("public key: {}", hex::encode(keypair.public_key()));
            println!("address:    {}", hex::encode(keypair.address()));
            Ok(())
        }
        Command::Init => {
            let keypair = load_or_generate_keypair(&cli.data_dir)?;
            let mut ledger = open_ledger(&cli.data_dir, &config)?;
            init_genesis(&mut ledger, &config, &keypair)?;
            println!("initialized ledger in {}", cli.data_dir.display());
            Ok(())
        }
        Command::Pay { to, amount } => {
            let keypair = load_or_generate_keypair(&cli.data_dir)?;
            let ledger = open_ledger(&cli.data_dir, &config)?;
            let amount: BigUint = amount.parse()?;
            let mut pack = Pack::new();
            pack.pay(BASE_TOKEN, parse_address(&to)?, &amount);
            pack.seal(&keypair, &ledger)?;
            println!("{}", hex::encode(pack.bytes()));
            Ok(())
        }
        Command::Submit { file } => submit(&cli.data_dir, config, &file),
        Command::Pack { hash } => {
            let ledger = open_ledger(&cli.data_dir, &config)?;
            let hash = decode_hash(&hash).ok_or("invalid pack hash")?;
            match ledger.pack(&hash)? {
                Some(pack) => println!("{}", serde_json::to_string_pretty(&pack.display())?),
                None => println!("pack not found"),
            }
            Ok(())
        }
        Command::Balance { address, token } => {
            let ledger = open_ledger(&cli.data_dir, &config)?;
            let token = match token {
                Some(t) => decode_hash(&t).ok_or("invalid token hash")?,
                None => BASE_TOKEN,
            };
            println!("{}", ledger.balance(&parse_address(&address)?, &token)?);
            Ok(())
        }
        Command::Leaves => {
            let ledger = open_ledger(&cli.data_dir, &config)?;
            for leaf in ledger.leaves()? {
                println!("{}", encode_hash(&leaf));
            }
            Ok(())
        }
        Command::Stabilizers => {
            let ledger = open_ledger(&cli.data_dir, &config)?;
            for stabilizer in ledger.stabilizers()? {
                println!("{} {}", hex::encode(stabilizer.address), stabilizer.support);
            }
            Ok(())
        }
        Command::StateHash => {
            let ledger = open_ledger(&cli.data_dir, &config)?;
            println!("{}", encode_hash(&ledger.state_hash()?));
            Ok(())
        }
        Command::Run => run_node(&cli.data_dir, config).await,
    }
}

fn parse_address(text: &str) -> Result<Address, Box<dyn std::error::Error>> {
    let bytes = hex::decode(text)?;
    Ok(bytes.try_into().map_err(|_| "address must be 32 bytes")?)
}

fn submit(data_dir: &Path, config: Config, file: &Path) -> CliResult {
    let text = std::fs::read_to_string(file)?;
    let bytes = hex::decode(text.trim())?;
    let ledger = open_ledger(data_dir, &config)?;
    let mut engine = Engine::new(ledger, config, Arc::new(NullTransport));
    let admitted = engine.admit(&bytes)?;
    engine.ledger().flush()?;
    println!("admitted {}", encode_hash(&admitted.hash));
    for hash in &admitted.stabilized {
        println!("stabilized {}", encode_hash(hash));
    }
    Ok(())
}

async fn run_node(data_dir: &Path, config: Config) -> CliResult {
    tracing::info!("Starting packdag node");
    tracing::info!("Data: {}", data_dir.display());

    let ledger = open_ledger(data_dir, &config)?;
    if !ledger.is_initialized()? {
        return Err("ledger not initialized, run `packdag init` first".into());
    }
    let (transport, events) = LoopbackTransport::new();
    let mut node = Node::new(Engine::new(ledger, config, Arc::new(transport)), events);

    let handle = node.handle();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let bytes = match hex::decode(line) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Ignoring non-hex input: {}", e);
                    continue;
                }
            };
            match handle.submit(&bytes).await {
                Ok(admitted) => println!("admitted {}", encode_hash(&admitted.hash)),
                Err(e) => println!("rejected: {}", e),
            }
        }
    });

    node.run().await;
    Ok(())
}
