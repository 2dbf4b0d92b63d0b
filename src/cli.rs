//! Command-line entry point (C14 ambient stack). Spec §1 explicitly treats
//! "CLI utilities" as an external collaborator; this binary has no
//! subcommands of its own; it's the daemon entry point, configured entirely
//! from the environment (spec §6).

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zen-watcher", version, about = "Kubernetes-native event aggregation engine")]
pub struct Opts {}
