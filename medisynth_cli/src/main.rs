use clap::{Args, Parser, Subcommand};
use medisynth_core::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "medisynth")]
#[command(about = "Hospital records, resource allocation and criticality scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage patient records
    #[command(subcommand)]
    Patient(PatientCommand),

    /// Manage capacity-limited resources
    #[command(subcommand)]
    Resource(ResourceCommand),

    /// Manage staff members
    #[command(subcommand)]
    Staff(StaffCommand),

    /// Allocate one unit of a resource to a patient
    Allocate(PatientResource),

    /// Return a patient's unit of a resource
    Deallocate(PatientResource),

    /// Assign a staff member to a patient
    Assign(PatientStaff),

    /// Unassign a staff member from a patient
    Unassign(PatientStaff),

    /// Check every relationship invariant
    Audit,

    /// Export patients ordered by criticality to CSV
    Roster {
        /// Output path (defaults to <data-dir>/roster.csv)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum PatientCommand {
    /// Register a new patient
    Add {
        /// Patient id (generated if omitted)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        age: Option<f64>,
        #[arg(long)]
        gender: Option<String>,
    },
    Show {
        id: String,
    },
    List,
    /// Remove a patient, releasing its resources and staff
    Remove {
        id: String,
    },
    /// Record manual readings, e.g. --field RestingBP=140
    Manual {
        id: String,
        #[arg(long = "field", value_parser = parse_field, required = true)]
        fields: Vec<(String, FieldValue)>,
    },
    /// Merge a structured lab-report extraction (JSON file)
    Ingest {
        id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Compute and store the criticality score
    Score {
        id: String,
    },
}

#[derive(Subcommand)]
enum ResourceCommand {
    /// Register a new resource with all units free
    Add {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        total: u32,
        #[arg(long = "type", default_value = "")]
        resource_type: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Show {
        id: String,
    },
    List,
}

#[derive(Subcommand)]
enum StaffCommand {
    /// Register a new staff member
    Add {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        role: String,
    },
    Show {
        id: String,
    },
    List,
    /// Patients assigned to a staff member
    Patients {
        id: String,
    },
}

#[derive(Args)]
struct PatientResource {
    patient_id: String,
    resource_id: String,
}

#[derive(Args)]
struct PatientStaff {
    patient_id: String,
    staff_id: String,
}

fn parse_field(raw: &str) -> std::result::Result<(String, FieldValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty field name in '{}'", raw));
    }
    let value = value.trim();
    let value = match value.parse::<f64>() {
        Ok(n) if n.is_finite() => FieldValue::Number(n),
        _ => FieldValue::Text(value.to_string()),
    };
    Ok((key.to_string(), value))
}

fn main() -> Result<()> {
    medisynth_core::logging::init();

    let cli = Cli::parse();

    let config = Config::load()?;
    medisynth_core::logging::set_level(&config.logging.level);

    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());

    match config.store.backend {
        StoreBackend::Json => {
            let ledger = Ledger::new(JsonStore::open(&data_dir)?);
            run(&ledger, cli.command, &data_dir)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; records are discarded on exit");
            let ledger = Ledger::new(MemoryStore::new());
            run(&ledger, cli.command, &data_dir)
        }
    }
}

fn run<S: RecordStore>(ledger: &Ledger<S>, command: Commands, data_dir: &Path) -> Result<()> {
    match command {
        Commands::Patient(cmd) => cmd_patient(ledger, cmd),
        Commands::Resource(cmd) => cmd_resource(ledger, cmd),
        Commands::Staff(cmd) => cmd_staff(ledger, cmd),

        Commands::Allocate(args) => {
            ledger.allocate_resource(&args.patient_id, &args.resource_id)?;
            println!(
                "✓ Allocated {} to patient {}",
                args.resource_id, args.patient_id
            );
            Ok(())
        }
        Commands::Deallocate(args) => {
            ledger.deallocate_resource(&args.patient_id, &args.resource_id)?;
            println!(
                "✓ Deallocated {} from patient {}",
                args.resource_id, args.patient_id
            );
            Ok(())
        }
        Commands::Assign(args) => {
            ledger.assign_staff(&args.patient_id, &args.staff_id)?;
            println!("✓ Assigned {} to patient {}", args.staff_id, args.patient_id);
            Ok(())
        }
        Commands::Unassign(args) => {
            ledger.unassign_staff(&args.patient_id, &args.staff_id)?;
            println!(
                "✓ Unassigned {} from patient {}",
                args.staff_id, args.patient_id
            );
            Ok(())
        }

        Commands::Audit => {
            let findings = ledger.audit()?;
            if findings.is_empty() {
                println!("✓ Records are consistent");
                return Ok(());
            }
            for finding in &findings {
                println!("  ✗ {}", finding);
            }
            Err(Error::InconsistentState(format!(
                "{} finding(s)",
                findings.len()
            )))
        }

        Commands::Roster { output } => {
            let path = output.unwrap_or_else(|| data_dir.join("roster.csv"));
            let count = write_roster(&ledger.patients()?, &path)?;
            println!("✓ Wrote {} patients to roster", count);
            println!("  CSV: {}", path.display());
            Ok(())
        }
    }
}

fn cmd_patient<S: RecordStore>(ledger: &Ledger<S>, cmd: PatientCommand) -> Result<()> {
    match cmd {
        PatientCommand::Add {
            id,
            name,
            age,
            gender,
        } => {
            let mut patient = Patient::new(id.unwrap_or_else(new_record_id));
            if let Some(name) = name {
                patient.patient_info.insert("name".into(), FieldValue::Text(name));
            }
            if let Some(age) = age {
                patient.patient_info.insert("age".into(), FieldValue::Number(age));
            }
            if let Some(gender) = gender {
                patient
                    .patient_info
                    .insert("gender".into(), FieldValue::Text(gender));
            }
            let id = patient.id.clone();
            ledger.create_patient(patient)?;
            println!("✓ Created patient {}", id);
            Ok(())
        }
        PatientCommand::Show { id } => print_json(&ledger.patient(&id)?),
        PatientCommand::List => print_json(&ledger.patients()?),
        PatientCommand::Remove { id } => {
            let report = ledger.remove_patient(&id)?;
            for skipped in &report.skipped {
                eprintln!("  ! skipped {} {}: {}", skipped.kind, skipped.id, skipped.reason);
            }
            print_json(&report)
        }
        PatientCommand::Manual { id, fields } => {
            let patient = ledger.record_manual_data(&id, fields.into_iter().collect())?;
            print_json(&patient.manual_data)
        }
        PatientCommand::Ingest { id, file } => {
            let extraction = LabExtraction::load(&file)?;
            let patient = ledger.ingest_lab_extraction(&id, extraction)?;
            print_json(&patient)
        }
        PatientCommand::Score { id } => print_json(&ledger.refresh_criticality(&id)?),
    }
}

fn cmd_resource<S: RecordStore>(ledger: &Ledger<S>, cmd: ResourceCommand) -> Result<()> {
    match cmd {
        ResourceCommand::Add {
            id,
            name,
            total,
            resource_type,
            description,
        } => {
            let mut resource = Resource::new(id, name, total);
            resource.resource_type = resource_type;
            resource.description = description;
            let id = resource.id.clone();
            ledger.create_resource(resource)?;
            println!("✓ Created resource {} ({} units)", id, total);
            Ok(())
        }
        ResourceCommand::Show { id } => print_json(&ledger.resource(&id)?),
        ResourceCommand::List => print_json(&ledger.resources()?),
    }
}

fn cmd_staff<S: RecordStore>(ledger: &Ledger<S>, cmd: StaffCommand) -> Result<()> {
    match cmd {
        StaffCommand::Add { id, name, role } => {
            let mut staff = StaffUser::new(id, name);
            staff.role = role;
            let id = staff.id.clone();
            ledger.create_staff(staff)?;
            println!("✓ Created staff {}", id);
            Ok(())
        }
        StaffCommand::Show { id } => print_json(&ledger.staff(&id)?),
        StaffCommand::List => print_json(&ledger.staff_members()?),
        StaffCommand::Patients { id } => print_json(&ledger.patients_for_staff(&id)?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
