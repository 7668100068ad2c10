use std::time::Duration;

use clap::Parser;

use super::CliArgs;
use crate::config::{ConfigFile, into_run};
use crate::http::TlsVerification;

fn parse(args: &[&str]) -> Result<CliArgs, String> {
    CliArgs::try_parse_from(std::iter::once("volley").chain(args.iter().copied()))
        .map_err(|err| err.to_string())
}

#[test]
fn classic_flags_parse() -> Result<(), String> {
    let args = parse(&[
        "-n", "100", "-c", "10", "-q", "5", "-t", "2s", "-m", "PUT", "-H", "X-A: 1", "-H",
        "X-A: 2", "-d", "body", "http://localhost:8080/",
    ])?;
    let (run, template) = into_run(&args.overlay()).map_err(|err| err.to_string())?;
    if run.requests != 100 || run.concurrency != 10 {
        return Err(format!("Unexpected run: {:?}", run));
    }
    if template.timeout() != Duration::from_secs(2) || *template.method() != http::Method::PUT {
        return Err(format!("Unexpected template: {:?}", template));
    }
    if template.headers().get_all("x-a").iter().count() != 2 {
        return Err("Repeated -H values were lost".to_owned());
    }
    Ok(())
}

#[test]
fn duration_without_count_is_unbounded() -> Result<(), String> {
    let args = parse(&["-z", "3s", "http://localhost:8080/"])?;
    let (run, _) = into_run(&args.overlay()).map_err(|err| err.to_string())?;
    if run.requests != 0 || run.run_timeout != Some(Duration::from_secs(3)) {
        return Err(format!("Unexpected run: {:?}", run));
    }
    Ok(())
}

#[test]
fn malformed_values_are_rejected() -> Result<(), String> {
    for bad in [
        vec!["-H", "NoColon", "http://x/"],
        vec!["-q", "-1", "http://x/"],
        vec!["-t", "5parsecs", "http://x/"],
        vec!["--insecure", "--verify-tls", "http://x/"],
        vec!["-d", "a", "-D", "file", "http://x/"],
    ] {
        if parse(&bad).is_ok() {
            return Err(format!("Accepted: {:?}", bad));
        }
    }
    Ok(())
}

#[test]
fn flags_override_config_file() -> Result<(), String> {
    let file = ConfigFile {
        url: Some("http://file/".to_owned()),
        concurrency: Some(7),
        insecure: Some(true),
        ..ConfigFile::default()
    };
    let args = parse(&["--verify-tls", "-c", "3"])?;
    let merged = file.merge(args.overlay());
    let (run, template) = into_run(&merged).map_err(|err| err.to_string())?;
    if run.concurrency != 3 || run.transport.tls != TlsVerification::Verify {
        return Err(format!("Unexpected run: {:?}", run));
    }
    if template.url().as_str() != "http://file/" {
        return Err(format!("Unexpected url: {}", template.url()));
    }
    Ok(())
}
