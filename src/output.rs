use colored::Colorize;

use crate::models::{RepoReport, RunSummary};

/// Print the per-repository counters and the run total
pub fn print_summary(summary: &RunSummary, dry_run: bool) {
    if dry_run {
        println!(
            "\n {} (no changes were made)",
            "DRY RUN".yellow().bold()
        );
    }
    println!("{}", "─".repeat(60));

    for report in &summary.repos {
        print_repo_line(report);
    }

    println!("{}", "═".repeat(60));
    let label = if dry_run {
        "DRY RUN SUMMARY:".yellow().bold()
    } else {
        "SUMMARY:".bold()
    };
    let verb = if dry_run { "Would delete" } else { "Deleted" };
    let failed = summary.failed_repos();
    println!(
        "{} {} {} images in {} repositories, {} failed",
        label,
        verb,
        summary.images_deleted.to_string().red().bold(),
        summary.repos.len(),
        if failed > 0 {
            failed.to_string().red().bold().to_string()
        } else {
            failed.to_string()
        }
    );

    if !dry_run && summary.images_deleted > 0 {
        println!(
            "\n{} Run registry garbage collection to reclaim disk space.",
            "REMINDER:".yellow().bold()
        );
    }
}

fn print_repo_line(report: &RepoReport) {
    if report.failed {
        println!(
            "  {:<40} {}",
            report.repository,
            "FAILED".red().bold()
        );
        return;
    }

    let mut extra = Vec::new();
    if report.not_found > 0 {
        extra.push(format!("{} already gone", report.not_found));
    }
    if report.rejected > 0 {
        extra.push(format!("{} rejected", report.rejected).red().to_string());
    }

    println!(
        "  {:<40} {} deleted{}",
        report.repository,
        if report.deleted > 0 {
            report.deleted.to_string().red().bold().to_string()
        } else {
            report.deleted.to_string().green().to_string()
        },
        if extra.is_empty() {
            String::new()
        } else {
            format!(" ({})", extra.join(", ")).dimmed().to_string()
        }
    );
}
