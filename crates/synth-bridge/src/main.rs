use std::process;

use anyhow::Context;
use synth_bridge::{BridgeConfig, SynthBridge, SynthesisRequest};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let (voice, texts) = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: synth-bridge [--voice <name>] <text>...");
            eprintln!();
            eprintln!("Each <text> is synthesized in order; results are printed as JSON lines.");
            eprintln!("The worker is configured through SYNTH_* environment variables.");
            process::exit(2);
        }
    };

    synth_bridge::logging::init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(voice, texts)) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<(Option<String>, Vec<String>), String> {
    let mut voice = None;
    let mut texts = Vec::new();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--voice" => {
                i += 1;
                voice = Some(args.get(i).ok_or("--voice requires a value")?.clone());
            }
            "--help" | "-h" => return Err(String::new()),
            "--" => {
                texts.extend(args[i + 1..].iter().cloned());
                break;
            }
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => texts.push(arg.to_string()),
        }
        i += 1;
    }

    if texts.is_empty() {
        return Err("missing required argument: <text>".to_string());
    }
    Ok((voice, texts))
}

async fn run(voice: Option<String>, texts: Vec<String>) -> anyhow::Result<()> {
    let config = BridgeConfig::from_env().context("invalid bridge configuration")?;
    let bridge = SynthBridge::new(config);

    bridge
        .initialize()
        .await
        .context("worker failed to initialize")?;

    let mut failures = 0usize;
    for text in texts {
        let mut request = SynthesisRequest::new(text);
        if let Some(ref voice) = voice {
            request = request.with_voice(voice.clone());
        }
        match bridge.call(request).await {
            Ok(output) => println!("{}", serde_json::to_string(&output)?),
            Err(e) => {
                failures += 1;
                tracing::error!(error = %e, "Synthesis failed");
                let line = serde_json::json!({ "status": "error", "error": e.to_string() });
                println!("{}", line);
            }
        }
    }

    let snapshot = bridge.snapshot().await;
    tracing::info!(
        completed = snapshot.completed,
        failed = snapshot.failed,
        "All requests processed"
    );
    bridge.shutdown().await;

    if failures > 0 {
        anyhow::bail!("{} request(s) failed", failures);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("synth-bridge")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_voice_and_texts() {
        let (voice, texts) = parse_args(&argv(&["--voice", "alba", "hello", "world"])).unwrap();
        assert_eq!(voice.as_deref(), Some("alba"));
        assert_eq!(texts, vec!["hello", "world"]);
    }

    #[test]
    fn double_dash_ends_flags() {
        let (_, texts) = parse_args(&argv(&["--", "--not-a-flag"])).unwrap();
        assert_eq!(texts, vec!["--not-a-flag"]);
    }

    #[test]
    fn rejects_missing_text_and_unknown_flags() {
        assert!(parse_args(&argv(&[])).is_err());
        assert!(parse_args(&argv(&["--loud", "hi"])).is_err());
        assert!(parse_args(&argv(&["--voice"])).is_err());
    }
}
