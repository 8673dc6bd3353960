//! informe - command-line front end for inventory reports
//!
//! Subcommands:
//! - summary: metrics, grouped values and top products for one business unit
//! - save: archive the filtered rows into the history directory
//! - history: list saved reports, newest first
//! - export: write the (optionally narrowed) rows as CSV

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use informe_core::aggregate::{GroupTotal, Summary, PRODUCT_COLUMN, VALUE_COLUMN};
use informe_core::export::{csv_file_name, file_name_prefix};
use informe_core::filter::DESCRIPTION_COLUMN;
use informe_core::format::{format_currency, format_thousands, truncate_label, LABEL_WIDTH};
use informe_core::history::newest_first;
use informe_core::pipeline::PipelineOptions;
use informe_core::{
    explore, to_csv, Config, ExploreFilter, HistoryLog, Period, Pipeline, Report, Value,
};

#[derive(Parser, Debug)]
#[command(name = "informe", about = "Inventory report summaries, history and CSV export")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print metrics for one business unit
    Summary {
        /// Workbook to read (xlsx, xls, xlsb, ods)
        #[arg(long)]
        file: PathBuf,

        /// Business unit to keep (default: DEFAULT_GERENCIA)
        #[arg(long)]
        gerencia: Option<String>,

        /// Sheet to read (default: SHEET_NAME)
        #[arg(long)]
        sheet: Option<String>,
    },

    /// Archive the filtered rows into the history directory
    Save {
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        gerencia: Option<String>,

        /// Month label (default: current month)
        #[arg(long)]
        month: Option<String>,

        /// Year (default: current year)
        #[arg(long)]
        year: Option<i32>,

        /// Saved by (default: DEFAULT_USER)
        #[arg(long)]
        user: Option<String>,
    },

    /// List saved reports, newest first
    History,

    /// Write the filtered rows as CSV
    Export {
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        gerencia: Option<String>,

        /// Exact "Estado" value
        #[arg(long)]
        status: Option<String>,

        /// Exact "Cobertura Inv" value
        #[arg(long)]
        coverage: Option<String>,

        /// Text to look for in "Descripción"
        #[arg(long)]
        search: Option<String>,

        /// Output path (default: <gerencia>_<month>_<year>.csv)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = Config::from_env().context("Invalid configuration")?;

    match cli.command {
        Command::Summary { file, gerencia, sheet } => {
            let gerencia = gerencia.unwrap_or_else(|| config.default_gerencia.clone());
            let report = analyze(&config, sheet, &file, &gerencia).await?;
            print_summary(&gerencia, &report);
        }
        Command::Save {
            file,
            gerencia,
            month,
            year,
            user,
        } => {
            let gerencia = gerencia.unwrap_or_else(|| config.default_gerencia.clone());
            let current = Period::current();
            let period = Period::new(
                month.as_deref().unwrap_or(current.month()),
                year.unwrap_or(current.year()),
            )?;
            let user = user.unwrap_or_else(|| config.default_user.clone());

            let report = analyze(&config, None, &file, &gerencia).await?;
            if let Some(warning) = &report.warning {
                println!("{}", warning);
                return Ok(());
            }

            let history = HistoryLog::spawn(&config.history_dir)?;
            let entry = history
                .append(report.dataset, period, user)
                .await
                .context("Failed to save report")?;

            println!("=== Informe guardado ===");
            println!("Archivo: {}", entry.archive);
            println!("Periodo: {} {}", entry.month, entry.year);
            println!("Registros: {}", format_thousands(entry.rows as f64));
        }
        Command::History => {
            let history = HistoryLog::spawn(&config.history_dir)?;
            let entries = newest_first(history.list().await.context("Failed to read history")?);

            if entries.is_empty() {
                println!("No hay informes guardados");
                return Ok(());
            }

            println!("=== Histórico ({}) ===", config.history_dir.display());
            for entry in &entries {
                println!(
                    "{:<12} {:>5}  {}  {:<16} {:>10}",
                    entry.month,
                    entry.year,
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.user,
                    format_thousands(entry.rows as f64)
                );
            }
            println!("Total: {} informes", entries.len());
        }
        Command::Export {
            file,
            gerencia,
            status,
            coverage,
            search,
            output,
        } => {
            let gerencia = gerencia.unwrap_or_else(|| config.default_gerencia.clone());
            let report = analyze(&config, None, &file, &gerencia).await?;

            let filter = ExploreFilter {
                status,
                coverage,
                search,
            };
            let rows = explore(&report.dataset, &filter);
            let bytes = to_csv(&rows).context("Failed to encode CSV")?;

            let current = Period::current();
            let output = output.unwrap_or_else(|| {
                PathBuf::from(csv_file_name(
                    &file_name_prefix(&gerencia),
                    current.month(),
                    current.year(),
                ))
            });
            std::fs::write(&output, &bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            println!(
                "Exported {} of {} rows to {}",
                rows.len(),
                report.dataset.len(),
                output.display()
            );
        }
    }

    Ok(())
}

async fn analyze(
    config: &Config,
    sheet: Option<String>,
    file: &Path,
    gerencia: &str,
) -> Result<Report> {
    let pipeline = Pipeline::new(PipelineOptions {
        sheet_name: sheet.unwrap_or_else(|| config.sheet_name.clone()),
        loader: config.loader_options(),
    });
    pipeline
        .analyze(file, gerencia)
        .await
        .with_context(|| format!("Failed to load {}", file.display()))
}

fn print_summary(gerencia: &str, report: &Report) {
    let summary = &report.summary;

    println!("=== Informe de Inventario: {} ===", gerencia);
    match report.filter_column {
        Some(column) => println!(
            "Filtro por '{}': {} de {} registros",
            column,
            format_thousands(summary.rows as f64),
            format_thousands(report.total_rows as f64)
        ),
        None => println!("Sin columna de gerencia, {} registros", report.total_rows),
    }

    if let Some(warning) = &report.warning {
        println!("{}", warning);
        return;
    }

    println!();
    println!("Productos:        {}", format_thousands(summary.product_count as f64));
    println!("Stock total:      {}", format_thousands(summary.total_stock));
    println!("Valor total:      {}", format_currency(summary.total_value));
    match summary.mean_turnover {
        Some(t) => println!("Rotación media:   {:.2}", t),
        None => println!("Rotación media:   N/A"),
    }

    print_groups("Valor por estado", summary.value_by_status.as_deref());
    print_groups("Valor por cobertura", summary.value_by_coverage.as_deref());
    print_top(summary);
    print_turnover(summary);
}

fn print_groups(title: &str, groups: Option<&[GroupTotal]>) {
    let Some(groups) = groups else {
        return;
    };
    println!();
    println!("{}:", title);
    for group in groups {
        println!("  {:<24} {:>12}", group.key, format_currency(group.value));
    }
}

fn print_top(summary: &Summary) {
    let Some(top) = &summary.top_by_value else {
        return;
    };
    println!();
    println!("Top {} por valor:", top.len());

    for (rank, row) in top.rows().enumerate() {
        let cell = |name: &str| {
            top.column_index(name)
                .map(|i| row[i].clone())
                .unwrap_or(Value::Empty)
        };
        let label = match cell(DESCRIPTION_COLUMN) {
            Value::Empty => cell(PRODUCT_COLUMN).to_string(),
            desc => desc.to_string(),
        };
        let value = cell(VALUE_COLUMN).as_f64().unwrap_or(0.0);
        println!(
            "  {:>2}. {:<43} {:>12}",
            rank + 1,
            truncate_label(&label, LABEL_WIDTH),
            format_currency(value)
        );
    }
}

fn print_turnover(summary: &Summary) {
    let Some(hist) = &summary.turnover_distribution else {
        return;
    };
    let peak = hist.counts.iter().copied().max().unwrap_or(0).max(1);

    println!();
    println!("Distribución de rotación (días):");
    for (i, &count) in hist.counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let bar = "#".repeat((count * 30).div_ceil(peak));
        println!(
            "  {:>9.1} - {:<9.1} {:>6} {}",
            hist.edges[i],
            hist.edges[i + 1],
            count,
            bar
        );
    }
}
