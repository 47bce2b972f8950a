//! Progress bar and summary reporting for CLI runs.

use std::collections::HashMap;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::catalog::{Catalog, DocumentRecord};
use crate::format::format_bytes;
use crate::transfer::{IngestStatus, TransferOutcome, TransferProgress, TransferStatus};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates the document-count progress bar for a transfer run.
pub fn make_transfer_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} documents - {msg}",
        )
        .expect("progress template is valid")
        .progress_chars("━━╌"),
    );
    bar
}

/// Bridges [`TransferProgress`] events onto an indicatif bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    /// Creates a bar sized to the catalog.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            bar: make_transfer_bar(total),
        }
    }

    /// Clears the bar once the run is over.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl TransferProgress for BarProgress {
    fn on_document_start(&self, record: &DocumentRecord) {
        self.bar.set_message(record.name.clone());
    }

    fn on_progress(&self, completed: usize, _total: usize) {
        self.bar.set_position(completed as u64);
    }
}

/// Prints totals, per-library counts, and top file types for a catalog.
pub fn print_document_summary(catalog: &Catalog) {
    println!("\n{SEPARATOR}");
    println!("Document Summary");
    println!("{SEPARATOR}");
    println!("  Total documents:   {}", catalog.len());
    println!(
        "  Total size:        {}",
        format_bytes(catalog.total_size_bytes())
    );

    let mut libraries: HashMap<&str, (usize, u64)> = HashMap::new();
    let mut file_types: HashMap<String, usize> = HashMap::new();
    for doc in catalog.documents() {
        let library = doc
            .remote_path
            .path
            .first()
            .map_or("(root)", String::as_str);
        let entry = libraries.entry(library).or_default();
        entry.0 += 1;
        entry.1 += doc.size_bytes;

        if let Some((_, ext)) = doc.name.rsplit_once('.') {
            *file_types.entry(ext.to_ascii_lowercase()).or_default() += 1;
        }
    }

    if !libraries.is_empty() {
        println!("\n  Libraries:");
        let mut sorted: Vec<_> = libraries.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        for (name, (count, size)) in sorted {
            println!("    {name}: {count} file(s) ({})", format_bytes(size));
        }
    }

    if !file_types.is_empty() {
        println!("\n  File types:");
        let mut sorted: Vec<_> = file_types.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (ext, count) in sorted.iter().take(10) {
            println!("    .{ext}: {count} file(s)");
        }
        if sorted.len() > 10 {
            println!("    ... and {} more types", sorted.len() - 10);
        }
    }

    if !catalog.stats().errors.is_empty() {
        println!(
            "\n  {} {} subtree(s) could not be listed:",
            style("warning:").yellow(),
            catalog.stats().errors.len()
        );
        for error in &catalog.stats().errors {
            println!("    {}: {}", error.path, error.message);
        }
    }
    println!("{SEPARATOR}\n");
}

/// Prints the per-status totals of a transfer run and lists failures.
pub fn print_outcome_summary(outcomes: &HashMap<String, TransferOutcome>) {
    let succeeded = outcomes
        .values()
        .filter(|o| o.status == TransferStatus::Succeeded)
        .count();
    let skipped = outcomes
        .values()
        .filter(|o| o.status == TransferStatus::Skipped)
        .count();
    let failures: Vec<&TransferOutcome> = outcomes
        .values()
        .filter(|o| matches!(o.status, TransferStatus::Failed(_)))
        .collect();
    let ingested = outcomes
        .values()
        .filter(|o| o.ingest == Some(IngestStatus::Succeeded))
        .count();
    let ingest_failed = outcomes
        .values()
        .filter(|o| o.ingest == Some(IngestStatus::Failed))
        .count();

    println!("\n{SEPARATOR}");
    println!("Transfer Summary");
    println!("{SEPARATOR}");
    println!("  Downloaded:  {}", style(succeeded).green());
    if skipped > 0 {
        println!("  Skipped:     {skipped} (already present or cancelled)");
    }
    if !failures.is_empty() {
        println!("  Failed:      {}", style(failures.len()).red());
        for outcome in &failures {
            if let TransferStatus::Failed(kind) = &outcome.status {
                println!("    {}: {kind}", outcome.document_id);
            }
        }
    }
    if ingested > 0 || ingest_failed > 0 {
        println!("  Ingested:    {ingested}");
        if ingest_failed > 0 {
            println!("  Ingest failures: {}", style(ingest_failed).red());
        }
    }
    println!("{SEPARATOR}");
}
