use jarverify::audit::{self, AuditConfig, LogDestination};
use jarverify::keystore::{load_trust_store, KeystoreDescriptor, LoadPolicy};
use jarverify::pipeline::{jar_filter, JarProcessor, VerifyNestedStep};
use jarverify::{Certificate, JarError, ResultCode, VerifierConfig};

use jarverify::reexports::log;

use clap::{crate_description, crate_name, crate_version, Arg, ArgAction, ArgMatches, Command};
use std::path::Path;

fn keystore_arg() -> Arg {
    Arg::new("keystore")
        .value_name("TYPE=LOCATION")
        .long("keystore")
        .short('k')
        .action(ArgAction::Append)
        .help("Trust store, e.g. JKS=/etc/trusted.jks or PEM=file:///etc/roots.pem")
}

fn input_arg(help: &'static str) -> Arg {
    Arg::new("in")
        .value_name("input_file")
        .long("input-file")
        .short('i')
        .required(true)
        .help(help)
}

/// Verifier configuration from `-c`, the environment and `-k`, in that order.
fn load_config(matches: &ArgMatches) -> Result<VerifierConfig, JarError> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => VerifierConfig::from_toml_file(path)?,
        None => VerifierConfig::default(),
    };
    config.apply_env()?;
    if let Some(keystores) = matches.get_many::<String>("keystore") {
        for keystore in keystores {
            config.add_keystores_from_list(keystore)?;
        }
    }
    if matches.get_flag("refresh") {
        config.trust.refresh = true;
    }
    if matches.get_flag("skip_bad_stores") {
        config.trust.on_store_error = LoadPolicy::Skip;
    }
    Ok(config)
}

fn print_certificate(certificate: &Certificate, verbose: bool) {
    println!("    Subject: {}", certificate.subject());
    println!("    Issuer:  {}", certificate.issuer());
    println!("    Serial:  {}", certificate.serial_hex());
    if verbose {
        println!("    SHA-256: {}", certificate.fingerprint());
        if let Ok((_, parsed)) = x509_parser::parse_x509_certificate(certificate.der()) {
            let validity = parsed.validity();
            println!(
                "    Valid:   {} to {}",
                validity.not_before, validity.not_after
            );
        }
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, JarError> {
    serde_json::to_string_pretty(value).map_err(|e| JarError::InternalError(e.to_string()))
}

/// Returns `false` when a verification result is a failure.
fn start() -> Result<bool, JarError> {
    let verifier_args = [
        keystore_arg(),
        Arg::new("config")
            .value_name("config_file")
            .long("config")
            .short('c')
            .help("TOML configuration file"),
        Arg::new("refresh")
            .long("refresh")
            .action(ArgAction::SetTrue)
            .help("Reload trust stores before every verification"),
        Arg::new("skip_bad_stores")
            .long("skip-bad-stores")
            .action(ArgAction::SetTrue)
            .help("Ignore trust stores that cannot be loaded"),
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .help("Print results as JSON"),
    ];

    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Verbose output"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Prints debugging information"),
        )
        .arg(
            Arg::new("audit")
                .long("audit")
                .action(ArgAction::SetTrue)
                .help("Enable structured audit logging (JSON to stderr)"),
        )
        .arg(
            Arg::new("audit-file")
                .long("audit-file")
                .value_name("FILE")
                .help("Write audit logs to FILE instead of stderr"),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify the signatures of a jar and whether its signers are trusted")
                .arg(input_arg("Jar file"))
                .args(verifier_args.clone()),
        )
        .subcommand(
            Command::new("certs")
                .about("Print the signer certificate chains of a jar")
                .arg(input_arg("Jar file")),
        )
        .subcommand(
            Command::new("keystore")
                .about("List the certificates of trust stores")
                .arg(keystore_arg().required(true)),
        )
        .subcommand(
            Command::new("process")
                .about("Process a jar or a directory of jars, verifying nested jars")
                .arg(input_arg("Jar file or directory"))
                .arg(
                    Arg::new("work")
                        .value_name("working_dir")
                        .long("working-dir")
                        .short('w')
                        .required(true)
                        .help("Directory receiving the processed jars"),
                )
                .args(verifier_args),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let debug = matches.get_flag("debug");
    let audit_enabled = matches.get_flag("audit");
    let audit_file = matches.get_one::<String>("audit-file").map(|s| s.as_str());

    env_logger::builder()
        .format_timestamp(None)
        .format_level(false)
        .format_module_path(false)
        .format_target(false)
        .filter_level(if debug {
            log::LevelFilter::Debug
        } else if verbose {
            log::LevelFilter::Info
        } else {
            log::LevelFilter::Warn
        })
        .init();

    if audit_enabled || audit_file.is_some() {
        let destination = match audit_file {
            Some(path) => LogDestination::File(path.to_string()),
            None => LogDestination::Stderr,
        };
        audit::init(AuditConfig {
            enabled: true,
            destination,
            ..AuditConfig::default()
        })?;
    }

    let ok = if let Some(matches) = matches.subcommand_matches("verify") {
        let input_file = matches.get_one::<String>("in").map(|s| s.as_str());
        let input_file = input_file.ok_or(JarError::UsageError("Missing input file"))?;
        let config = load_config(matches)?;
        let mut verifier = config.build_verifier();
        let result = verifier.verify(input_file);

        if matches.get_flag("json") {
            println!("{}", to_json(&result)?);
        } else {
            println!("{}: {}", input_file, result.code);
            if let Some(cause) = &result.cause {
                println!("  Cause: {}", cause);
            }
            if verbose {
                for chain in verifier.certificate_entries().iter() {
                    println!("  Chain:");
                    for certificate in chain {
                        print_certificate(certificate, verbose);
                    }
                }
            }
        }
        !result.code.is_failure()
    } else if let Some(matches) = matches.subcommand_matches("certs") {
        let input_file = matches.get_one::<String>("in").map(|s| s.as_str());
        let input_file = input_file.ok_or(JarError::UsageError("Missing input file"))?;
        let mut verifier = VerifierConfig::default().build_verifier();
        let result = verifier.verify(input_file);
        match result.code {
            ResultCode::IntegrityVerified | ResultCode::SourceVerified => {
                for (i, chain) in verifier.certificate_entries().iter().enumerate() {
                    println!("Chain {} ({} certificate(s)):", i + 1, chain.len());
                    for certificate in chain {
                        print_certificate(certificate, verbose);
                    }
                }
                true
            }
            ResultCode::NotSigned => {
                println!("{}: not signed", input_file);
                true
            }
            _ => {
                println!("{}: {}", input_file, result);
                false
            }
        }
    } else if let Some(matches) = matches.subcommand_matches("keystore") {
        let keystores = matches
            .get_many::<String>("keystore")
            .ok_or(JarError::UsageError("Missing keystore"))?;
        for keystore in keystores {
            let descriptor: KeystoreDescriptor = keystore.parse()?;
            let store = load_trust_store(&descriptor)?;
            println!("{} ({} certificate(s)):", descriptor, store.len());
            for certificate in store.certificates() {
                print_certificate(certificate, verbose);
                println!();
            }
        }
        true
    } else if let Some(matches) = matches.subcommand_matches("process") {
        let input = matches.get_one::<String>("in").map(|s| s.as_str());
        let input = input.ok_or(JarError::UsageError("Missing input file"))?;
        let work_dir = matches.get_one::<String>("work").map(|s| s.as_str());
        let work_dir = work_dir.ok_or(JarError::UsageError("Missing working directory"))?;

        let config = load_config(matches)?;
        let step = VerifyNestedStep::new(config.build_verifier());
        let results = step.results();
        let mut processor = JarProcessor::new(work_dir);
        processor.add_step(step);
        let report = processor.process(Path::new(input), jar_filter)?;

        let results = results
            .lock()
            .map_err(|_| JarError::InternalError("Lock poisoned".to_string()))?;
        if matches.get_flag("json") {
            println!("{}", to_json(results.as_slice())?);
        } else {
            for record in results.iter() {
                println!("{}{}: {}", "  ".repeat(record.depth), record.origin, record.result);
            }
            for output in &report.outputs {
                log::info!("Wrote {}", output.display());
            }
        }
        for (path, e) in &report.failures {
            eprintln!("{}: {}", path.display(), e);
        }
        report.failures.is_empty() && results.iter().all(|r| !r.result.code.is_failure())
    } else {
        return Err(JarError::UsageError("No subcommand specified"));
    };
    Ok(ok)
}

fn main() {
    match start() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
