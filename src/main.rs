use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use freelance_billing::{logging, EngineConfig, InvoiceService, InvoiceStatus};

#[derive(Parser, Debug)]
#[command(name = "freelance-billing", about = "Invoice billing and delivery engine")]
struct Cli {
    /// SQLite database file; overrides FREELANCE_DB_PATH.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Acting user.
    #[arg(long, global = true, default_value_t = 1)]
    user: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the time entries linked to an invoice and recalculate it.
    Link {
        invoice: i64,
        #[arg(long = "entry", num_args = 0..)]
        entries: Vec<i64>,
    },

    /// Recalculate an invoice from its linked entries.
    Recalc {
        invoice: i64,
        #[arg(long)]
        tax_rate: Option<f64>,
    },

    /// Print the default message block.
    Message { invoice: i64 },

    /// Render the invoice document.
    Render {
        invoice: i64,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        message: Option<String>,
    },

    /// Deliver the invoice through the configured channel.
    Send { invoice: i64 },

    /// List the user's invoices.
    List,

    /// Change an invoice's status.
    Status { invoice: i64, status: StatusArg },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StatusArg {
    Draft,
    Sent,
    Paid,
    Overdue,
}

impl From<StatusArg> for InvoiceStatus {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::Draft => InvoiceStatus::Draft,
            StatusArg::Sent => InvoiceStatus::Sent,
            StatusArg::Paid => InvoiceStatus::Paid,
            StatusArg::Overdue => InvoiceStatus::Overdue,
        }
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    logging::init(&config.log_level);

    let service = InvoiceService::open(config)?;
    let user = cli.user;

    match cli.command {
        Command::Link { invoice, entries } => {
            let inv = service.set_time_entries(user, invoice, &entries)?;
            print_totals(&inv);
        }

        Command::Recalc { invoice, tax_rate } => {
            let tax_rate = match tax_rate {
                Some(rate) => rate,
                None => service.get_invoice(user, invoice)?.tax_rate,
            };
            let inv = service.recalculate(user, invoice, tax_rate)?;
            print_totals(&inv);
        }

        Command::Message { invoice } => {
            println!("{}", service.get_default_message(user, invoice)?);
        }

        Command::Render { invoice, out, message } => {
            let bytes = service.render_document(user, invoice, message.as_deref())?;
            let path = out.unwrap_or_else(|| PathBuf::from(format!("invoice-{invoice}.pdf")));
            std::fs::write(&path, &bytes)
                .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))?;
            println!("{} ({} bytes)", path.display(), bytes.len());
        }

        Command::Send { invoice } => {
            let outcome = service.send_email(user, invoice)?;
            println!("{outcome}");
        }

        Command::List => {
            for inv in service.list_invoices(user)? {
                println!(
                    "{:>5}  {:<16} {:<8} {:>12.2}",
                    inv.id,
                    inv.number,
                    inv.status.as_str(),
                    inv.total
                );
            }
        }

        Command::Status { invoice, status } => {
            let inv = service.set_status(user, invoice, status.into())?;
            println!("{} {}", inv.number, inv.status.as_str());
        }
    }

    Ok(())
}

fn print_totals(inv: &freelance_billing::Invoice) {
    println!("invoice {} ({} items)", inv.number, inv.items.len());
    println!("  subtotal {:.2}", inv.subtotal);
    println!("  tax      {:.2}", inv.tax_amount);
    println!("  total    {:.2}", inv.total);
}
