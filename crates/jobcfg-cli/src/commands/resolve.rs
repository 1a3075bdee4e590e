//! Resolved output commands.

use anyhow::{bail, Result};
use jobcfg_core::{ResolvedJob, ResolvedRun};

use super::load;
use crate::OutputFormat;

pub fn resolve(path: &str, format: OutputFormat) -> Result<()> {
    let job = load(path)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&job)?),
        OutputFormat::Text => print_text(&job),
    }
    Ok(())
}

pub fn args(path: &str, run: Option<&str>) -> Result<()> {
    let job = load(path)?;
    let runs: Vec<&ResolvedRun> = job
        .runs
        .iter()
        .filter(|r| run.is_none_or(|name| r.name == name))
        .collect();

    if runs.is_empty() {
        if let Some(name) = run {
            bail!("no run named '{}' in job '{}'", name, job.job_name);
        }
    }
    for r in runs {
        println!("{}\t{}", r.name, r.command_line());
    }
    Ok(())
}

fn print_text(job: &ResolvedJob) {
    println!("Job: {} ({})", job.job_name, job.command_type);
    if !job.global_variables.is_empty() {
        println!("Global variables:");
        for (name, value) in job.global_variables.iter() {
            println!("  {} = {}", name, value);
        }
    }

    for run in &job.runs {
        println!();
        println!("Run: {}", run.name);
        println!("  arguments: {}", run.command_line());
        for (name, value) in run.variables.iter() {
            println!("  var {} = {}", name, value);
        }
        if let Some(mail) = &run.mail_settings {
            println!(
                "  mail: enabled={} send_attachment={} subject={:?} sender={:?}",
                mail.enabled, mail.send_attachment, mail.subject, mail.sender
            );
            if !mail.attachment_file_name.is_empty() {
                println!("    attachment: {}", mail.attachment_file_name);
            }
            if !mail.body_file.is_empty() {
                println!("    body: {}", mail.body_file);
            }
        }
        if let Some(upload) = &run.upload_settings {
            println!(
                "  upload: enabled={} file_name={}",
                upload.enabled, upload.file_name
            );
        }
    }
}
