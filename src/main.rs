use anyhow::Context;
use bitcoin::Network;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use yubiwallet::utils::config::parse_network;
use yubiwallet::utils::logging;
use yubiwallet::{
    initialize_device, sign_transaction, tx, SignerConfig, Slot, SpendRequest, WalletError, YubiKeyDevice,
};

#[derive(Parser)]
#[command(name = "yubiwallet", version, about = "Sign transactions with a key held on a YubiKey")]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Substring the smart card reader name must contain
    #[arg(long, global = true)]
    reader: Option<String>,

    /// PIV slot (9a, 9c, 9d, 9e or its name)
    #[arg(long, global = true)]
    slot: Option<Slot>,

    #[arg(long, global = true)]
    pin: Option<String>,

    /// bitcoin, testnet, signet or regtest
    #[arg(long, global = true)]
    network: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results and errors as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new RSA-2048 key on the token, replacing the slot's key
    Init {
        /// Confirm that the existing key may be overwritten
        #[arg(long)]
        force: bool,
    },
    /// Build, sign and serialize a single-input transaction
    Sign {
        #[arg(long)]
        utxo_hash: String,
        #[arg(long)]
        utxo_index: u32,
        #[arg(long)]
        recipient: String,
        /// Value of the spent output, in satoshis
        #[arg(long, allow_hyphen_values = true)]
        amount: i64,
        #[arg(long, allow_hyphen_values = true)]
        fee: i64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.verbose {
        logging::enable_debug();
    }

    match run(&cli) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(err) => {
            report(&err, cli.json);
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let config = load_config(cli)?;

    match &cli.command {
        Command::Init { force } => {
            if !force {
                return Err(WalletError::invalid_config("Provisioning replaces the key in the slot")
                    .with_details(format!("pass --force to overwrite slot {}", config.slot))
                    .into());
            }

            let device = YubiKeyDevice::new(&config)?;
            let public_key = initialize_device(&device)?;
            let spki = hex::encode(tx::encode_public_key(&public_key)?);

            Ok(if cli.json {
                serde_json::json!({ "slot": config.slot, "public_key": spki }).to_string()
            } else {
                spki
            })
        }
        Command::Sign {
            utxo_hash,
            utxo_index,
            recipient,
            amount,
            fee,
        } => {
            let request = SpendRequest {
                utxo_hash: utxo_hash.clone(),
                utxo_index: *utxo_index,
                destination: recipient.clone(),
                amount: *amount,
                fee: *fee,
            };

            let device = YubiKeyDevice::new(&config)?;
            let wire = sign_transaction(&device, &request, config.network)?;

            Ok(if cli.json {
                serde_json::to_string(&wire)?
            } else {
                format!("{}\ntxid: {}", wire, wire.txid())
            })
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SignerConfig> {
    let mut config = match &cli.config {
        Some(path) => SignerConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SignerConfig::default(),
    };

    if let Some(reader) = &cli.reader {
        config = config.with_reader_filter(reader.clone());
    }
    if let Some(slot) = cli.slot {
        config = config.with_slot(slot);
    }
    if let Some(pin) = &cli.pin {
        config = config.with_pin(pin.clone());
    }
    if let Some(network) = &cli.network {
        let network: Network = parse_network(network)?;
        config = config.with_network(network);
    }

    config.validate()?;
    Ok(config)
}

/// The `WalletError` behind `err`, or an `Internal` one carrying its context chain.
fn to_wallet_error(err: &anyhow::Error) -> WalletError {
    match err.downcast_ref::<WalletError>() {
        Some(wallet_err) => wallet_err.clone(),
        None => WalletError::internal(format!("{:#}", err)),
    }
}

fn report(err: &anyhow::Error, json: bool) {
    let wallet_err = to_wallet_error(err);
    if json {
        match serde_json::to_string(&wallet_err) {
            Ok(rendered) => eprintln!("{}", rendered),
            Err(_) => eprintln!("{}", wallet_err),
        }
    } else {
        eprintln!("error: {}", wallet_err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yubiwallet::ErrorCode;

    #[test]
    fn test_foreign_errors_become_internal() {
        let err = anyhow::anyhow!("disk full").context("Failed to write output");
        let wallet_err = to_wallet_error(&err);

        assert_eq!(wallet_err.code, ErrorCode::Internal);
        assert_eq!(wallet_err.message, "Failed to write output: disk full");

        let rendered = serde_json::to_value(&wallet_err).unwrap();
        assert_eq!(rendered["code"], "internal");
    }

    #[test]
    fn test_wallet_errors_pass_through() {
        let err = anyhow::Error::new(WalletError::invalid_config("PIN must be 6 to 8 characters"))
            .context("Failed to load configuration");
        let wallet_err = to_wallet_error(&err);

        assert_eq!(wallet_err.code, ErrorCode::InvalidConfig);
        assert_eq!(wallet_err.message, "PIN must be 6 to 8 characters");
    }
}
