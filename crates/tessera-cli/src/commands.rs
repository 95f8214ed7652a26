use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::{json, Value};
use tessera_db::{
    ArchiveSummary, Collection, Database, DatabaseConfig, Precedence, Proof, Query, RecordId,
    Verification,
};
use tessera_types::BlockId;

use crate::cli::*;

/// Settings shared by every command.
struct Env {
    format: OutputFormat,
    config: DatabaseConfig,
}

impl Env {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let env = Env {
        format: cli.format,
        config: load_config(cli.config.as_deref())?,
    };
    match cli.command {
        Command::Init(args) => cmd_init(&env, args),
        Command::Ingest(args) => cmd_ingest(&env, args),
        Command::Index(args) => cmd_index(&env, args),
        Command::Query(args) => cmd_query(&env, args),
        Command::Get(args) => cmd_get(&env, args),
        Command::Proof(args) => cmd_proof(&env, args),
        Command::Verify(args) => cmd_verify(&env, args),
        Command::Merge(args) => cmd_merge(&env, args),
        Command::Info(args) => cmd_info(&env, args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DatabaseConfig> {
    let Some(path) = path else {
        return Ok(DatabaseConfig::default());
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn open(env: &Env, path: &Path) -> anyhow::Result<Database> {
    Database::import_with_config(path, env.config.clone())
        .with_context(|| format!("opening {}", path.display()))
}

fn save(db: &Database, path: &Path) -> anyhow::Result<ArchiveSummary> {
    db.export_to_archive(path)
        .with_context(|| format!("writing {}", path.display()))
}

fn hex_root(root: Option<BlockId>) -> String {
    root.map(|id| id.to_hex()).unwrap_or_else(|| "(empty)".into())
}

/// JSON if it parses, otherwise the text as a string.
fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn parse_record_id(collection: &Collection, text: &str) -> anyhow::Result<RecordId> {
    let key_len = collection.primary_key().len();
    let value = parse_value(text);
    if key_len == 1 {
        return Ok(RecordId::single(&value)?);
    }
    match value {
        Value::Array(values) if values.len() == key_len => Ok(RecordId::composite(values)?),
        _ => bail!(
            "collection {} has a composite key; pass a JSON array of {key_len} values",
            collection.name()
        ),
    }
}

fn parse_filter(text: &str) -> anyhow::Result<(String, Value)> {
    match text.split_once('=') {
        Some((field, value)) if !field.is_empty() => Ok((field.to_string(), parse_value(value))),
        _ => bail!("expected FIELD=VALUE, got {text:?}"),
    }
}

fn cmd_init(env: &Env, args: InitArgs) -> anyhow::Result<()> {
    if args.archive.exists() && !args.force {
        bail!("{} already exists (use --force to replace it)", args.archive.display());
    }
    let db = Database::with_config(env.config.clone())?;
    let summary = save(&db, &args.archive)?;
    if env.json() {
        println!("{}", json!({"archive": args.archive.display().to_string(), "root": hex_root(summary.root)}));
    } else {
        println!(
            "{} Initialized database in {}",
            "✓".green().bold(),
            args.archive.display().to_string().bold()
        );
        println!("  Root: {}", hex_root(summary.root).cyan());
    }
    Ok(())
}

fn cmd_ingest(env: &Env, args: IngestArgs) -> anyhow::Result<()> {
    let db = open(env, &args.archive)?;
    let collection = db.collection_with_keys(&args.collection, args.keys.as_slice())?;
    let count = match &args.input {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("opening {}", path.display()))?;
            collection.index_ndjson(BufReader::new(file))?
        }
        None => collection.index_ndjson(io::stdin().lock())?,
    };
    let summary = save(&db, &args.archive)?;
    if env.json() {
        println!(
            "{}",
            json!({
                "collection": args.collection,
                "documents": count,
                "root": hex_root(summary.root),
            })
        );
    } else {
        println!(
            "{} Ingested {} documents into {}",
            "✓".green().bold(),
            count.to_string().bold(),
            args.collection.yellow()
        );
        println!("  Root: {}", hex_root(summary.root).cyan());
    }
    Ok(())
}

fn cmd_index(env: &Env, args: IndexArgs) -> anyhow::Result<()> {
    let db = open(env, &args.archive)?;
    let collection = db.existing_collection(&args.collection)?;
    let index = collection.create_index(args.fields.as_slice())?;
    let entries = index.len()?;
    save(&db, &args.archive)?;
    if env.json() {
        println!(
            "{}",
            json!({"collection": args.collection, "fields": index.fields(), "entries": entries})
        );
    } else {
        println!(
            "{} Index on {} in {} ({} entries)",
            "✓".green().bold(),
            index.fields().join(", ").yellow(),
            args.collection.bold(),
            entries
        );
    }
    Ok(())
}

fn cmd_query(env: &Env, args: QueryArgs) -> anyhow::Result<()> {
    let db = open(env, &args.archive)?;
    let collection = db.existing_collection(&args.collection)?;
    let mut query = Query::new().limit(args.limit);
    for filter in &args.filters {
        let (field, value) = parse_filter(filter)?;
        query = query.equal(field, value);
    }

    if args.explain {
        let plan = collection.explain(&query)?;
        if env.json() {
            println!("{}", json!({ "plan": plan }));
        } else {
            println!("Plan: {}", plan.to_string().cyan());
        }
        return Ok(());
    }

    let mut found = 0;
    for record in collection.search(&query)? {
        let record = record?;
        found += 1;
        if env.json() {
            println!("{}", record.data);
        } else {
            println!("{}  {}", record.id.to_string().yellow(), record.data);
        }
    }
    if !env.json() {
        println!("{} {} documents", "→".dimmed(), found.to_string().bold());
    }
    Ok(())
}

fn cmd_get(env: &Env, args: GetArgs) -> anyhow::Result<()> {
    let db = open(env, &args.archive)?;
    let collection = db.existing_collection(&args.collection)?;
    let record = collection.get(&parse_record_id(&collection, &args.id)?)?;
    if env.json() {
        println!("{}", record.data);
    } else {
        println!("{} {}", "Record".bold(), record.id.to_string().yellow());
        println!("{}", serde_json::to_string_pretty(&record.data)?);
    }
    Ok(())
}

fn cmd_proof(env: &Env, args: ProofArgs) -> anyhow::Result<()> {
    let db = open(env, &args.archive)?;
    let collection = db.existing_collection(&args.collection)?;
    let id = parse_record_id(&collection, &args.id)?;
    let proof = collection.get_proof(&id)?;
    let encoded = serde_json::to_string_pretty(&proof)?;
    match &args.output {
        None => println!("{encoded}"),
        Some(path) => {
            fs::write(path, &encoded).with_context(|| format!("writing {}", path.display()))?;
            if env.json() {
                println!(
                    "{}",
                    json!({
                        "id": id.to_value()?,
                        "proof": path.display().to_string(),
                        "root": proof.root.to_hex(),
                        "steps": proof.steps.len(),
                    })
                );
            } else {
                println!(
                    "{} Proof for {} written to {}",
                    "✓".green().bold(),
                    id.to_string().yellow(),
                    path.display().to_string().bold()
                );
                println!("  Root: {}", proof.root.to_hex().cyan());
                println!("  Steps: {}", proof.steps.len());
            }
        }
    }
    Ok(())
}

fn cmd_verify(env: &Env, args: VerifyArgs) -> anyhow::Result<()> {
    let text = fs::read_to_string(&args.proof)
        .with_context(|| format!("reading {}", args.proof.display()))?;
    let proof: Proof = serde_json::from_str(&text).context("parsing proof")?;
    let root = BlockId::from_hex(&args.root).context("parsing root")?;

    let verification = proof.check(&root);
    if env.json() {
        let outcome = match &verification {
            Verification::Valid => json!({"valid": true}),
            Verification::RootMismatch { expected, actual } => json!({
                "valid": false,
                "expected": expected.to_hex(),
                "actual": actual.to_hex(),
            }),
            Verification::Malformed(reason) => json!({"valid": false, "reason": reason}),
        };
        println!("{outcome}");
    } else {
        match &verification {
            Verification::Valid => {
                println!("{} Proof verified against {}", "✓".green().bold(), root.to_hex().cyan())
            }
            Verification::RootMismatch { actual, .. } => println!(
                "{} Proof is for root {}, not {}",
                "✗".red().bold(),
                actual.to_hex().yellow(),
                root.to_hex().cyan()
            ),
            Verification::Malformed(reason) => {
                println!("{} Malformed proof: {}", "✗".red().bold(), reason)
            }
        }
    }
    if !verification.is_valid() {
        bail!("proof did not verify");
    }
    Ok(())
}

fn cmd_merge(env: &Env, args: MergeArgs) -> anyhow::Result<()> {
    let left = open(env, &args.left)?;
    let right = open(env, &args.right)?;
    let precedence = match args.prefer {
        Side::Left => Precedence::Left,
        Side::Right => Precedence::Right,
    };
    let merged = Database::merge_with(&left, &right, precedence)?;
    let summary = save(&merged, &args.output)?;
    if env.json() {
        println!(
            "{}",
            json!({
                "output": args.output.display().to_string(),
                "root": hex_root(summary.root),
                "blocks": summary.block_count,
            })
        );
    } else {
        println!(
            "{} Merged {} and {} into {}",
            "✓".green().bold(),
            args.left.display(),
            args.right.display(),
            args.output.display().to_string().bold()
        );
        println!("  Root: {}", hex_root(summary.root).cyan());
        println!("  Blocks: {}", summary.block_count);
    }
    Ok(())
}

fn cmd_info(env: &Env, args: InfoArgs) -> anyhow::Result<()> {
    let db = open(env, &args.archive)?;
    let verified = Database::verify_archive(&args.archive)
        .with_context(|| format!("verifying {}", args.archive.display()))?;
    let meta = db.meta_info()?;
    let mut collections = Vec::new();
    for name in db.collection_names()? {
        let collection = db.existing_collection(&name)?;
        let indexes: Vec<Vec<String>> = collection
            .indexes()?
            .iter()
            .map(|index| index.fields().to_vec())
            .collect();
        collections.push(json!({
            "name": name,
            "primary_key": collection.primary_key(),
            "documents": collection.count()?,
            "indexes": indexes,
        }));
    }

    if env.json() {
        println!(
            "{}",
            json!({
                "format": meta.format,
                "version": meta.version,
                "root": hex_root(db.root()),
                "blocks": db.block_count(),
                "verified_blocks": verified,
                "collections": collections,
            })
        );
        return Ok(());
    }

    println!("Archive: {}", args.archive.display().to_string().bold());
    println!("Format: {} v{}", meta.format, meta.version);
    println!("Root: {}", hex_root(db.root()).cyan());
    println!("Blocks: {} ({} verified)", db.block_count(), verified);
    for collection in &collections {
        println!(
            "  {} key={} documents={} indexes={}",
            collection["name"].as_str().unwrap_or_default().yellow().bold(),
            collection["primary_key"],
            collection["documents"],
            collection["indexes"]
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn env() -> Env {
        Env {
            format: OutputFormat::Json,
            config: DatabaseConfig::default(),
        }
    }

    fn write_users(dir: &Path) -> PathBuf {
        let path = dir.join("users.ndjson");
        fs::write(
            &path,
            "{\"name\": \"Alice\", \"city\": \"Oslo\"}\n\n  {\"name\": \"Bob\", \"city\": \"Rome\"}\n",
        )
        .unwrap();
        path
    }

    fn init(dir: &Path, name: &str) -> PathBuf {
        let archive = dir.join(name);
        cmd_init(
            &env(),
            InitArgs {
                archive: archive.clone(),
                force: false,
            },
        )
        .unwrap();
        archive
    }

    fn ingest(archive: &Path, input: &Path) {
        cmd_ingest(
            &env(),
            IngestArgs {
                archive: archive.to_path_buf(),
                collection: "users".into(),
                keys: vec!["name".into()],
                input: Some(input.to_path_buf()),
            },
        )
        .unwrap();
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("Alice"), json!("Alice"));
        assert_eq!(parse_value("\"42\""), json!("42"));
        assert_eq!(parse_filter("a=b=c").unwrap(), ("a".to_string(), json!("b=c")));
        assert!(parse_filter("novalue").is_err());
        assert!(parse_filter("=1").is_err());
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let archive = init(dir.path(), "db.tsra");
        let again = InitArgs {
            archive: archive.clone(),
            force: false,
        };
        assert!(cmd_init(&env(), again).is_err());
        let forced = InitArgs {
            archive,
            force: true,
        };
        assert!(cmd_init(&env(), forced).is_ok());
    }

    #[test]
    fn ingest_index_query_and_prove() {
        let dir = tempfile::tempdir().unwrap();
        let archive = init(dir.path(), "db.tsra");
        ingest(&archive, &write_users(dir.path()));

        cmd_index(
            &env(),
            IndexArgs {
                archive: archive.clone(),
                collection: "users".into(),
                fields: vec!["city".into()],
            },
        )
        .unwrap();

        let db = Database::import_from_archive(&archive).unwrap();
        let users = db.existing_collection("users").unwrap();
        assert_eq!(users.count().unwrap(), 2);
        assert!(users.index(&["city"]).unwrap().exists().unwrap());

        cmd_query(
            &env(),
            QueryArgs {
                archive: archive.clone(),
                collection: "users".into(),
                filters: vec!["city=Oslo".into()],
                limit: 0,
                explain: false,
            },
        )
        .unwrap();
        cmd_get(
            &env(),
            GetArgs {
                archive: archive.clone(),
                collection: "users".into(),
                id: "Bob".into(),
            },
        )
        .unwrap();

        let proof_path = dir.path().join("bob.proof.json");
        cmd_proof(
            &env(),
            ProofArgs {
                archive: archive.clone(),
                collection: "users".into(),
                id: "Bob".into(),
                output: Some(proof_path.clone()),
            },
        )
        .unwrap();

        let root = db.root().unwrap().to_hex();
        cmd_verify(
            &env(),
            VerifyArgs {
                proof: proof_path.clone(),
                root,
            },
        )
        .unwrap();
        let wrong = VerifyArgs {
            proof: proof_path,
            root: BlockId::from_hash([0; 32]).to_hex(),
        };
        assert!(cmd_verify(&env(), wrong).is_err());
    }

    #[test]
    fn merge_archives() {
        let dir = tempfile::tempdir().unwrap();
        let left = init(dir.path(), "left.tsra");
        let right = init(dir.path(), "right.tsra");
        ingest(&left, &write_users(dir.path()));
        let more = dir.path().join("more.ndjson");
        fs::write(&more, "{\"name\": \"Tom\"}\n{\"name\": \"William\"}\n").unwrap();
        ingest(&right, &more);

        let output = dir.path().join("merged.tsra");
        cmd_merge(
            &env(),
            MergeArgs {
                left,
                right,
                output: output.clone(),
                prefer: Side::Right,
            },
        )
        .unwrap();

        let merged = Database::import_from_archive(&output).unwrap();
        assert_eq!(merged.existing_collection("users").unwrap().count().unwrap(), 4);
        cmd_info(&env(), InfoArgs { archive: output }).unwrap();
    }

    #[test]
    fn missing_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = InfoArgs {
            archive: dir.path().join("absent.tsra"),
        };
        assert!(cmd_info(&env(), args).is_err());
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.toml");
        fs::write(&path, "compression_level = 7\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.compression_level, 7);
        assert_eq!(config.format, "database");
        assert_eq!(load_config(None).unwrap(), DatabaseConfig::default());
    }
}
