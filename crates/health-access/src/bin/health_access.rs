//! Health Access CLI
//!
//! Drives the access ledger over a JSON state file.
//!
//! Usage:
//!   health-access register-patient --name <name> [--blood-group <g>] [--allergies a,b]
//!   health-access register-clinician --name <name> [--specialty <s>] [--hospital <h>]
//!   health-access add-record --patient <id> --type <t> --description <d>
//!   health-access grant --patient <id> [--minutes <m>]
//!   health-access redeem --code <payload|-> --actor <id>
//!   health-access revoke --token <id> --actor <id>
//!   health-access ledger [--patient <id>] [--actor <id>]
//!   health-access verify

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use health_access::{
    AccessService, Attributes, CodeEncoder, IntegrityVerdict, JsonCodeEncoder, NewRecord,
    RecordStore, RedemptionPayload, RegistryConfig, StateSnapshot, SystemClock, TokenSecret,
};
use serde_json::{json, Value};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "health-access")]
#[command(author = "Mycelix Health")]
#[command(version = "0.1.0")]
#[command(about = "Temporary, audited access to patient records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// State file (created on first write)
    #[arg(short, long, default_value = "health-access-state.json")]
    state: PathBuf,

    /// Registry config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a patient profile
    RegisterPatient {
        #[arg(long)]
        name: String,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        contact: Option<String>,
        #[arg(long)]
        blood_group: Option<String>,
        /// Comma separated
        #[arg(long, value_delimiter = ',')]
        allergies: Vec<String>,
    },

    /// Register a clinician profile
    RegisterClinician {
        #[arg(long)]
        name: String,
        #[arg(long)]
        specialty: Option<String>,
        #[arg(long)]
        contact: Option<String>,
        #[arg(long)]
        hospital: Option<String>,
        /// Professional registration number
        #[arg(long)]
        registration: Option<String>,
    },

    /// Add a medical record for a patient
    AddRecord {
        #[arg(long)]
        patient: String,
        #[arg(long = "type")]
        record_type: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Issue an access code for a patient
    Grant {
        #[arg(long)]
        patient: String,
        /// Validity in minutes (config default if omitted)
        #[arg(short, long)]
        minutes: Option<i64>,
        /// Issuing party, if not the patient
        #[arg(long)]
        actor: Option<String>,
    },

    /// Redeem an access code
    Redeem {
        /// Scanned payload text, or '-' for stdin
        #[arg(long, conflicts_with_all = ["token", "secret"])]
        code: Option<String>,
        #[arg(long, requires = "secret")]
        token: Option<String>,
        #[arg(long, requires = "token")]
        secret: Option<String>,
        /// Redeeming clinician
        #[arg(long)]
        actor: String,
    },

    /// Revoke an access code
    Revoke {
        #[arg(long)]
        token: String,
        #[arg(long)]
        actor: String,
    },

    /// Print ledger blocks
    Ledger {
        #[arg(long)]
        patient: Option<String>,
        #[arg(long)]
        actor: Option<String>,
    },

    /// Verify chain integrity (non-zero exit on violation)
    Verify,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RegistryConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RegistryConfig::default(),
    };
    let snapshot = StateSnapshot::load(&cli.state)
        .with_context(|| format!("loading state {}", cli.state.display()))?;
    let service = AccessService::from_snapshot(snapshot, config, Arc::new(SystemClock));

    let mut exit = ExitCode::SUCCESS;
    let mut dirty = true;

    let result: Value = match cli.command {
        Commands::RegisterPatient {
            name,
            age,
            gender,
            contact,
            blood_group,
            allergies,
        } => {
            let attributes = attributes(json!({
                "name": name,
                "age": age,
                "gender": gender,
                "contact": contact,
                "blood_group": blood_group,
                "allergies": allergies,
            }));
            let id = service.patients.register(attributes, Utc::now());
            json!({ "success": true, "patient_id": id })
        }
        Commands::RegisterClinician {
            name,
            specialty,
            contact,
            hospital,
            registration,
        } => {
            let attributes = attributes(json!({
                "name": name,
                "specialty": specialty,
                "contact": contact,
                "hospital": hospital,
                "registration": registration,
            }));
            let id = service.clinicians.register(attributes, Utc::now());
            json!({ "success": true, "doctor_id": id })
        }
        Commands::AddRecord {
            patient,
            record_type,
            description,
            date,
            notes,
        } => {
            let record = NewRecord {
                record_type,
                description,
                date,
                doctor_notes: notes,
            };
            let id = service.records.append_record(&patient, record, Utc::now())?;
            json!({ "success": true, "record_id": id })
        }
        Commands::Grant {
            patient,
            minutes,
            actor,
        } => {
            let issued = match minutes {
                Some(m) => {
                    let validity = Duration::try_minutes(m).context("validity out of range")?;
                    service.registry.issue(&patient, validity, actor.as_deref())?
                }
                None => service.registry.issue_default(&patient, actor.as_deref())?,
            };
            json!({
                "success": true,
                "token_id": issued.token_id,
                "expires_at": issued.expires_at,
                "code": JsonCodeEncoder.encode(&issued.payload())?,
            })
        }
        Commands::Redeem {
            code,
            token,
            secret,
            actor,
        } => {
            let (token_id, secret) = match (code, token, secret) {
                (Some(code), _, _) => {
                    let text = if code == "-" {
                        let mut buf = String::new();
                        io::stdin().read_to_string(&mut buf)?;
                        buf
                    } else {
                        code
                    };
                    let payload = RedemptionPayload::decode(text.trim())
                        .context("malformed access code")?;
                    (payload.token_id, payload.secret)
                }
                (None, Some(token), Some(secret)) => (token, TokenSecret::from(secret)),
                _ => bail!("either --code or both --token and --secret are required"),
            };

            // Denied attempts are kept in the registry, so state is saved either way
            match service.registry.redeem(&token_id, &secret, &actor) {
                Ok(set) => json!({ "success": true, "verified": true, "records": set }),
                Err(err) => {
                    exit = ExitCode::FAILURE;
                    json!({ "success": false, "error": err.to_string(), "code": err.code() })
                }
            }
        }
        Commands::Revoke { token, actor } => {
            service.registry.revoke(&token, &actor)?;
            json!({ "success": true, "token_id": token })
        }
        Commands::Ledger { patient, actor } => {
            dirty = false;
            let blocks = match (patient, actor) {
                (Some(patient), _) => service.ledger.blocks_for_subject(&patient),
                (None, Some(actor)) => service.ledger.blocks_by_actor(&actor),
                (None, None) => service.ledger.all_blocks(),
            };
            json!({ "success": true, "ledger": blocks })
        }
        Commands::Verify => {
            dirty = false;
            match service.ledger.verify_integrity() {
                IntegrityVerdict::Valid { length } => json!({ "valid": true, "length": length }),
                IntegrityVerdict::Violated(violation) => {
                    exit = ExitCode::FAILURE;
                    json!({
                        "valid": false,
                        "first_invalid_index": violation.index,
                        "detail": violation.to_string(),
                    })
                }
            }
        }
    };

    if dirty {
        service
            .snapshot()
            .save(&cli.state)
            .with_context(|| format!("saving state {}", cli.state.display()))?;
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(exit)
}

/// Profile attributes from a JSON object, dropping unset fields
fn attributes(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => Attributes::new(),
    }
}
