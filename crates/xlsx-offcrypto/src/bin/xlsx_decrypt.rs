use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::prelude::*;
use xlsx_offcrypto::{
    decrypt_xlsx_with_options, inspect_encryption_info, DecryptOptions, EncryptionInfo,
    DEFAULT_MAX_PACKAGE_SIZE,
};

#[derive(Parser)]
#[command(about = "Decrypt a password-protected XLSX/XLSM/DOCX into its plain OOXML package.")]
struct Args {
    /// Encrypted workbook (compound file holding EncryptionInfo + EncryptedPackage).
    input: PathBuf,

    /// Where to write the decrypted ZIP package.
    #[arg(short, long, required_unless_present = "info")]
    output: Option<PathBuf>,

    /// Password (prefer `--password-env` to keep it out of the process list).
    #[arg(long, conflicts_with_all = ["password_env", "password_file"])]
    password: Option<String>,

    /// Read the password from this environment variable.
    #[arg(long, value_name = "VAR", conflicts_with = "password_file")]
    password_env: Option<String>,

    /// Read the password from a file (trailing newlines are trimmed).
    #[arg(long, value_name = "PATH")]
    password_file: Option<PathBuf>,

    /// Skip the Agile dataIntegrity HMAC check.
    #[arg(long)]
    skip_integrity: bool,

    /// Refuse container streams larger than this many bytes.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_PACKAGE_SIZE)]
    max_size: u64,

    /// Print the EncryptionInfo summary instead of decrypting.
    #[arg(long)]
    info: bool,
}

impl Args {
    fn password(&self) -> Result<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        if let Some(var) = &self.password_env {
            return std::env::var(var)
                .with_context(|| format!("environment variable {var} is not set"));
        }
        if let Some(path) = &self.password_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read password file {}", path.display()))?;
            return Ok(text.trim_end_matches(['\r', '\n']).to_string());
        }
        bail!("a password is required: pass --password, --password-env or --password-file")
    }
}

fn describe(info: &EncryptionInfo) -> String {
    let version = info.version();
    let mut out = format!(
        "scheme: {}\nversion: {}.{}\nflags: {:#010x}\n",
        info.scheme().name(),
        version.major,
        version.minor,
        version.flags
    );
    match info {
        EncryptionInfo::Agile { info, .. } => {
            let key_data = &info.key_data;
            out.push_str(&format!(
                "cipher: {} {}-bit {}\nhash: {}\nspin count: {}\n",
                key_data.cipher_algorithm,
                key_data.key_bits,
                key_data.cipher_chaining,
                key_data.hash_algorithm.name(),
                info.password.spin_count
            ));
        }
        EncryptionInfo::Standard { info, .. }
        | EncryptionInfo::Rc4CryptoApi { info, .. }
        | EncryptionInfo::Extensible { info, .. } => {
            out.push_str(&format!(
                "algorithm: {:#010x}\nhash algorithm: {:#010x}\nkey bits: {}\nprovider: {}\n",
                info.header.alg_id,
                info.header.alg_id_hash,
                info.key_len() * 8,
                info.header.csp_name
            ));
        }
    }
    out
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("read {}", args.input.display()))?;

    if args.info {
        let info = inspect_encryption_info(&bytes)
            .with_context(|| format!("inspect {}", args.input.display()))?;
        print!("{}", describe(&info));
        return Ok(());
    }

    let Some(output) = &args.output else {
        bail!("--output is required when decrypting");
    };
    let options = DecryptOptions {
        verify_integrity: !args.skip_integrity,
        max_package_size: args.max_size,
        ..DecryptOptions::default()
    };
    let password = zeroize::Zeroizing::new(args.password()?);
    let plain = decrypt_xlsx_with_options(&bytes, &password, options)
        .with_context(|| format!("decrypt {}", args.input.display()))?;
    std::fs::write(output, &plain).with_context(|| format!("write {}", output.display()))?;
    log::info!("wrote {} bytes to {}", plain.len(), output.display());
    Ok(())
}
