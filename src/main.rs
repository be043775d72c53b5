//! intent-attest - device and terminal sides of the intent token protocol
//!
//! `token` plays the device: derives the identity, records the intent, asks
//! for confirmation, attests, binds the given challenge and prints the token.
//! `verify` plays the terminal, using the demo enrollment (key derived from
//! the device id) as the registered public key.

use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{debug, info, warn, LevelFilter};

use intent_attest::{
    derive_identity, verify, ChallengeIssuer, FixedClock, FixedGate, IntentRecord,
    RandomChallengeIssuer, SystemClock, TimestampProvider, Token, TokenSession,
    UserConfirmationGate, VerifyOptions,
};

/// Intent attestation token utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Log level
    #[clap(long, default_value = "warn")]
    log_level: LevelFilter,
}

#[derive(Clone, PartialEq, Debug, Subcommand)]
enum Actions {
    /// Issue a fresh random challenge (terminal side)
    Challenge,

    /// Show the public key and fingerprint derived for a device
    Fingerprint {
        #[clap(long)]
        device_id: String,
    },

    /// Produce a signed token (device side)
    Token {
        #[clap(long)]
        device_id: String,

        /// Transaction intent to approve
        #[clap(long)]
        intent: String,

        /// Challenge issued by the terminal
        #[clap(long)]
        challenge: String,

        /// Override the token timestamp (ms since epoch)
        #[clap(long)]
        timestamp: Option<u64>,

        /// Approve the intent without prompting
        #[clap(long)]
        yes: bool,
    },

    /// Verify a token (terminal side), reading JSON from FILE or stdin
    Verify {
        #[clap(long)]
        device_id: String,

        /// Challenge the terminal issued for this transaction
        #[clap(long)]
        challenge: String,

        /// Override the verifier clock (ms since epoch)
        #[clap(long)]
        now: Option<u64>,

        #[clap(long, default_value_t = intent_attest::verify::DEFAULT_MAX_AGE_MS)]
        max_age_ms: u64,

        #[clap(long, default_value_t = intent_attest::verify::DEFAULT_FUTURE_SKEW_MS)]
        future_skew_ms: u64,

        file: Option<PathBuf>,
    },
}

/// Confirmation prompt on the controlling terminal
struct PromptGate;

impl UserConfirmationGate for PromptGate {
    fn confirm(&mut self, intent: &IntentRecord) -> bool {
        eprint!("Approve \"{}\"? [y/N] ", intent.text());
        if let Err(e) = io::stderr().flush() {
            warn!("Failed to flush confirmation prompt: {}", e);
        }

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

fn main() -> anyhow::Result<()> {
    let args = Options::parse();

    simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default())?;

    info!("intent-attest v{} starting", env!("CARGO_PKG_VERSION"));
    debug!("Executing command: {:?}", args.cmd);

    match args.cmd {
        Actions::Challenge => {
            let mut issuer = RandomChallengeIssuer::new(SystemClock);
            println!("{}", issuer.issue());
        }
        Actions::Fingerprint { device_id } => {
            let identity = derive_identity(&device_id)?;
            println!("public key:  {}", identity.public_key().to_hex());
            println!("fingerprint: {}", identity.fingerprint_hex());
        }
        Actions::Token {
            device_id,
            intent,
            challenge,
            timestamp,
            yes,
        } => {
            let token = generate_token(&device_id, &intent, &challenge, timestamp, yes)?;
            println!("{}", token.to_json_pretty()?);
        }
        Actions::Verify {
            device_id,
            challenge,
            now,
            max_age_ms,
            future_skew_ms,
            file,
        } => {
            let token = read_token(file)?;
            let key = derive_identity(&device_id)?.public_key().clone();
            let options = VerifyOptions {
                max_age_ms,
                future_skew_ms,
            };
            let now = now.unwrap_or_else(|| SystemClock.now_ms());

            let result = verify(&token, &challenge, &device_id, &key, now, &options);
            println!("{}", serde_json::to_string(&result)?);

            if !result.is_valid() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Run one device-side session end to end
fn generate_token(
    device_id: &str,
    intent: &str,
    challenge: &str,
    timestamp: Option<u64>,
    auto_approve: bool,
) -> anyhow::Result<Token> {
    let mut session = TokenSession::new();
    session.identify(device_id)?;
    session.record_intent(intent)?;

    let approved = if auto_approve {
        session.confirm_with(&mut FixedGate(true))?
    } else {
        session.confirm_with(&mut PromptGate)?
    };
    if !approved {
        warn!("Intent not approved - no token produced");
        anyhow::bail!("intent was not approved");
    }

    session.attest()?;
    session.bind_challenge(challenge)?;

    let token = match timestamp {
        Some(ts) => session.generate_token(&FixedClock(ts))?,
        None => session.generate_token(&SystemClock)?,
    };
    Ok(token)
}

fn read_token(file: Option<PathBuf>) -> anyhow::Result<Token> {
    let json = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(Token::from_json(&json)?)
}
