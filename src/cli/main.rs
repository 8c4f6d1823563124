use tng_manifest::{
    verify_manifest, DeviceProfile, ManifestError, ManifestOptions, ManifestSession,
    SignerConfig,
};

use tng_manifest::reexports::log;

use clap::{Arg, ArgAction, ArgMatches, Command, crate_description, crate_name, crate_version};
use std::path::Path;

/// Read a file with the path in the error message
fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>, ManifestError> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| ManifestError::file(path, e))
}

fn log_cert_arg() -> Arg {
    Arg::new("log_cert")
        .value_name("cert_file")
        .long("log-cert")
        .default_value("manifest_signer.crt")
        .help("Log signer certificate (PEM or DER)")
}

fn generate(matches: &ArgMatches) -> Result<(), ManifestError> {
    let drive = matches
        .get_one::<String>("drive")
        .ok_or(ManifestError::UsageError("Please provide a drive path with --drive"))?;

    let mut options = ManifestOptions::default()
        .with_log_signer(
            matches.get_one::<String>("log_key").map(String::as_str).unwrap_or("manifest_signer.key"),
            matches.get_one::<String>("log_cert").map(String::as_str).unwrap_or("manifest_signer.crt"),
        )
        .with_create_signer(!matches.get_flag("no_create_signer"));

    if let Some(dir) = matches.get_one::<String>("output_dir") {
        options = options.with_output_dir(dir);
    }
    if let Some(profile) = matches.get_one::<String>("profile") {
        options = options.with_profile(DeviceProfile::from_file(profile)?);
    }
    let mut signer_config = SignerConfig::default();
    if let Some(org) = matches.get_one::<String>("signer_org") {
        let cn = matches
            .get_one::<String>("signer_cn")
            .cloned()
            .unwrap_or_else(|| format!("{} Manifest Signer", org));
        signer_config = SignerConfig::new(org, cn);
    }
    if let Some(days) = matches.get_one::<u32>("signer_days") {
        signer_config = signer_config.with_validity_days(*days);
    }
    options = options.with_signer_config(signer_config);

    let output = ManifestSession::new(drive, options)?.run()?;

    if matches.get_flag("verbose") {
        println!("Local copy: {}", output.local_path.display());
        println!("Drive copy: {}", output.drive_path.display());
        println!("Unique ID:  {}", output.entry.unique_id);
        println!("Keys:       {}", output.entry.public_key_set.keys.len());
    }
    Ok(())
}

fn verify(matches: &ArgMatches) -> Result<(), ManifestError> {
    let input = matches
        .get_one::<String>("in")
        .ok_or(ManifestError::UsageError("Missing input file"))?;
    let cert = matches
        .get_one::<String>("log_cert")
        .ok_or(ManifestError::UsageError("Missing log signer certificate"))?;

    let entries = verify_manifest(&read_file(input)?, &read_file(cert)?)?;
    for entry in &entries {
        println!(
            "Signature is valid for device {} ({} keys, provisioned {})",
            entry.unique_id,
            entry.public_key_set.keys.len(),
            entry.provisioning_timestamp
        );
    }
    Ok(())
}

fn start() -> Result<(), ManifestError> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .subcommand_negates_reqs(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Verbose output"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Prints debugging information"),
        )
        .arg(
            Arg::new("drive")
                .value_name("drive_path")
                .long("drive")
                .short('d')
                .required(true)
                .help("Drive path of the device mass-storage drive"),
        )
        .arg(
            Arg::new("log_key")
                .value_name("key_file")
                .long("log-key")
                .default_value("manifest_signer.key")
                .help("Log signer private key (PEM, PKCS#8 or SEC1)"),
        )
        .arg(log_cert_arg())
        .arg(
            Arg::new("output_dir")
                .value_name("dir")
                .long("output-dir")
                .short('o')
                .default_value(".")
                .help("Directory for the local copy of the manifest"),
        )
        .arg(
            Arg::new("profile")
                .value_name("json_file")
                .long("profile")
                .help("JSON file overriding model, part number and organizations"),
        )
        .arg(
            Arg::new("no_create_signer")
                .long("no-create-signer")
                .action(ArgAction::SetTrue)
                .help("Fail instead of creating a missing log signer"),
        )
        .arg(
            Arg::new("signer_org")
                .value_name("organization")
                .long("signer-org")
                .help("Organization of a newly created log signer certificate"),
        )
        .arg(
            Arg::new("signer_cn")
                .value_name("common_name")
                .long("signer-cn")
                .requires("signer_org")
                .help("Common name of a newly created log signer certificate"),
        )
        .arg(
            Arg::new("signer_days")
                .value_name("days")
                .long("signer-days")
                .value_parser(clap::value_parser!(u32).range(1..))
                .help("Validity in days of a newly created log signer certificate"),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify a manifest file against a log signer certificate")
                .arg(
                    Arg::new("in")
                        .value_name("manifest_file")
                        .long("input-file")
                        .short('i')
                        .required(true)
                        .help("Manifest file"),
                )
                .arg(log_cert_arg()),
        )
        .get_matches();

    let debug = matches.get_flag("debug");

    env_logger::builder()
        .format_timestamp(None)
        .format_level(false)
        .format_module_path(false)
        .format_target(false)
        .filter_level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    match matches.subcommand() {
        Some(("verify", sub)) => verify(sub),
        _ => generate(&matches),
    }
}

fn main() -> Result<(), ManifestError> {
    let res = start();
    match res {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
