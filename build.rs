// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("modupdater")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Update a Minecraft mod folder to a new game version")
        .subcommand_required(false)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .default_value("config.toml")
                .global(true)
                .help("Configuration file"),
        )
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .value_name("VERSION")
                .global(true)
                .help("Target game version (overrides updateGameVersionTo)"),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .value_name("N")
                .global(true)
                .help("Maximum concurrent lookups (overrides concurrency)"),
        )
        .arg(
            Arg::new("max_retries")
                .long("max-retries")
                .value_name("N")
                .global(true)
                .help("Retry bound for transient registry failures (overrides maxRetries)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Enable debug logging"),
        )
        .subcommand(Command::new("init-config").about("Write a default configuration file"))
        .subcommand(Command::new("list").about("List mods in the source folder"))
        .subcommand(
            Command::new("check").about("Check every mod for a version compatible with the target"),
        )
        .subcommand(
            Command::new("update")
                .about("Back up and replace mods that have a compatible update")
                .arg(
                    Arg::new("names")
                        .num_args(0..)
                        .help("Mod names to update"),
                )
                .arg(
                    Arg::new("all")
                        .short('a')
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("names")
                        .help("Update every mod with an available update"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("modupdater.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
