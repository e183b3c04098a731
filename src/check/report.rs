use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::check::options::ReportOptions;
use crate::check::scoring::{ScoreSource, Scores};

/// Inputs shared by both report kinds
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub submission_id: i64,
    pub filename: &'a str,
    pub options: &'a ReportOptions,
    pub scores: &'a Scores,
    pub generated_at: DateTime<Utc>,
}

/// Similarity split over source categories; the parts always add up to the total.
pub fn source_breakdown(similarity: u8) -> [(&'static str, u8); 3] {
    let internet = similarity / 2;
    let publications = (u16::from(similarity) * 3 / 10) as u8;
    let student_papers = similarity - internet - publications;
    [
        ("Internet sources", internet),
        ("Publications", publications),
        ("Student papers", student_papers),
    ]
}

fn ai_band(ai: u8) -> &'static str {
    match ai {
        0..=20 => "Likely human-written",
        21..=60 => "Mixed signals",
        _ => "Likely AI-generated",
    }
}

fn header(out: &mut String, title: &str, ctx: &ReportContext<'_>) {
    let _ = writeln!(out, "TurnitQ {}", title);
    let _ = writeln!(out, "{}", "=".repeat(40));
    let _ = writeln!(out, "Submission: #{}", ctx.submission_id);
    let _ = writeln!(out, "Document:   {}", ctx.filename);
    let _ = writeln!(out, "Generated:  {} UTC", ctx.generated_at.format("%Y-%m-%d %H:%M"));
    if ctx.scores.source == ScoreSource::Local {
        let _ = writeln!(out, "Engine:     internal");
    }
    out.push('\n');
}

pub fn similarity_report_text(ctx: &ReportContext<'_>) -> String {
    let mut out = String::new();
    header(&mut out, "Similarity Report", ctx);

    let _ = writeln!(out, "Overall similarity: {}%", ctx.scores.similarity);
    out.push('\n');
    let _ = writeln!(out, "Match breakdown:");
    for (category, share) in source_breakdown(ctx.scores.similarity) {
        let _ = writeln!(out, "  {:<18} {:>3}%", category, share);
    }
    out.push('\n');
    let _ = writeln!(out, "Options:");
    for (question, answer) in ctx.options.summary() {
        let _ = writeln!(out, "  {:<28} {}", question, if answer { "Yes" } else { "No" });
    }
    out
}

pub fn ai_report_text(ctx: &ReportContext<'_>) -> String {
    let mut out = String::new();
    header(&mut out, "AI Writing Report", ctx);
    let _ = writeln!(out, "AI-generated content: {}%", ctx.scores.ai);
    let _ = writeln!(out, "Assessment: {}", ai_band(ctx.scores.ai));
    out
}

async fn write_report(dir: &Path, name: String, body: String) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

/// Writes `report_{id}_similarity.txt` to `dir`
pub async fn write_similarity_report(dir: &Path, ctx: &ReportContext<'_>) -> std::io::Result<PathBuf> {
    write_report(
        dir,
        format!("report_{}_similarity.txt", ctx.submission_id),
        similarity_report_text(ctx),
    )
    .await
}

/// Writes `report_{id}_ai.txt` to `dir`
pub async fn write_ai_report(dir: &Path, ctx: &ReportContext<'_>) -> std::io::Result<PathBuf> {
    write_report(dir, format!("report_{}_ai.txt", ctx.submission_id), ai_report_text(ctx)).await
}
