//! Sign command - Print URL signatures.

use std::path::Path;

use anyhow::{Result, bail};
use clap::Args;
use serde::Serialize;

use super::{ServiceArgs, print_json};
use crate::OutputFormat;

/// Arguments for the sign command.
#[derive(Args)]
pub struct SignArgs {
    /// URLs to sign
    #[arg(required = true)]
    pub urls: Vec<String>,

    #[command(flatten)]
    pub service: ServiceArgs,

    /// Show call metrics
    #[arg(long)]
    pub metrics: bool,
}

#[derive(Debug, Serialize)]
struct Signed {
    url: String,
    signature: Option<String>,
}

/// Execute the sign command.
pub fn execute(args: SignArgs, config: Option<&Path>, format: OutputFormat) -> Result<()> {
    let service = args.service.build(config)?;

    let mut results = Vec::with_capacity(args.urls.len());
    for url in &args.urls {
        let signature = service.signature_of(url)?;
        results.push(Signed {
            url: url.clone(),
            signature,
        });
    }
    let missing = results.iter().filter(|r| r.signature.is_none()).count();

    match format {
        OutputFormat::Human => {
            for result in &results {
                match &result.signature {
                    Some(signature) => println!("{}  {}", signature, result.url),
                    None => println!("{:<64}  {}", "-", result.url),
                }
            }
            if args.metrics {
                let snapshot = service.metrics().snapshot();
                println!("\nMetrics:");
                println!("  Calls:         {}", snapshot.calls);
                println!("  Signatures:    {}", snapshot.signatures);
                println!("  Domain misses: {}", snapshot.domain_misses);
                println!("  Failures:      {}", snapshot.transport_failures);
                println!("  Mean latency:  {:?}", snapshot.mean_latency());
            }
        }
        OutputFormat::Json | OutputFormat::JsonCompact => {
            if args.metrics {
                print_json(
                    &serde_json::json!({
                        "results": results,
                        "metrics": service.metrics().snapshot(),
                    }),
                    format,
                )?;
            } else {
                print_json(&results, format)?;
            }
        }
    }

    if missing > 0 {
        bail!("{} of {} URLs had no signature", missing, results.len());
    }
    Ok(())
}
