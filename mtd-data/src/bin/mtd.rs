use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use mtd_core::calculations::{QuarterScheme, TaxCalculator, YearEndStatement};
use mtd_core::db::DbConfig;
use mtd_core::lifecycle::{AmendmentLedger, EopsFiling, PeriodStateMachine, VatFiling, VatReturn};
use mtd_core::{AmendmentType, BusinessProfile, EopsDeclarations, MtdRepository, TaxPeriod};
use mtd_data::{TransactionLoader, build_registry};
use rust_decimal::Decimal;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Quarterly Making Tax Digital bookkeeping for a sole trader.
#[derive(Parser, Debug)]
#[command(name = "mtd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Storage backend (`sqlite` or `memory`)
    #[arg(long, global = true, default_value = "sqlite")]
    backend: String,

    /// Backend connection string; for sqlite a file path or `:memory:`
    #[arg(long, global = true, default_value = "mtd.db")]
    db: String,

    /// Owner whose records are read and written
    #[arg(long, global = true)]
    owner: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create any missing quarters for a tax year
    Init {
        tax_year: i32,
        #[arg(long, value_enum, default_value_t = SchemeArg::TaxYear)]
        scheme: SchemeArg,
    },
    /// List the quarters of a tax year
    Periods {
        tax_year: i32,
        /// Only drafts whose filing deadline has passed
        #[arg(long)]
        overdue: bool,
    },
    /// Recompute a period's totals from its transactions
    Refresh { period_id: i64 },
    /// File a draft period
    Submit { period_id: i64 },
    /// Reopen a filed period for correction
    Reopen {
        period_id: i64,
        #[arg(long)]
        reason: String,
        #[arg(long, value_enum, default_value_t = AmendmentArg::Correction)]
        kind: AmendmentArg,
    },
    /// File a reopened period as corrected
    Resubmit { period_id: i64 },
    /// Show the amendment history of a period
    Amendments { period_id: i64 },
    /// Import income from CSV (date,amount,vat_rate,description)
    ImportIncome { file: PathBuf },
    /// Import expenses from CSV (date,amount,vat_rate,description,disallowable_amount)
    ImportExpenses { file: PathBuf },
    /// Import year-end adjustments from CSV (tax_year,description,amount,kind)
    ImportAdjustments { file: PathBuf },
    /// Update the business profile used for VAT readiness
    Profile {
        #[arg(long)]
        business_name: Option<String>,
        #[arg(long)]
        vat_number: Option<String>,
        #[arg(long)]
        hmrc_connected: Option<bool>,
    },
    /// Show the VAT boxes for a period, optionally recording them
    Vat {
        period_id: i64,
        #[arg(long)]
        record: bool,
    },
    /// Preview, save or submit the End of Period Statement
    Eops {
        tax_year: i32,
        #[arg(long, value_enum, default_value_t = EopsAction::Preview)]
        action: EopsAction,
        #[command(flatten)]
        declarations: DeclarationArgs,
    },
    /// Income tax and Class 4 NIC on a profit figure
    Tax {
        profit: Decimal,
        #[arg(long, default_value_t = 2024)]
        tax_year: i32,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SchemeArg {
    TaxYear,
    Calendar,
}

impl From<SchemeArg> for QuarterScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::TaxYear => QuarterScheme::TaxYear,
            SchemeArg::Calendar => QuarterScheme::Calendar,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AmendmentArg {
    Correction,
    LateSubmission,
    DataUpdate,
}

impl From<AmendmentArg> for AmendmentType {
    fn from(arg: AmendmentArg) -> Self {
        match arg {
            AmendmentArg::Correction => AmendmentType::Correction,
            AmendmentArg::LateSubmission => AmendmentType::LateSubmission,
            AmendmentArg::DataUpdate => AmendmentType::DataUpdate,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EopsAction {
    Preview,
    Draft,
    Submit,
}

#[derive(Args, Debug)]
struct DeclarationArgs {
    /// Confirm the accounts for the year are final
    #[arg(long)]
    accounts_finalised: bool,
    /// Confirm all income has been declared
    #[arg(long)]
    all_income_declared: bool,
    /// Confirm all allowable expenses have been claimed
    #[arg(long)]
    all_expenses_claimed: bool,
    /// Confirm year-end adjustments have been reviewed
    #[arg(long)]
    adjustments_reviewed: bool,
}

impl From<&DeclarationArgs> for EopsDeclarations {
    fn from(args: &DeclarationArgs) -> Self {
        Self {
            accounts_finalised: args.accounts_finalised,
            all_income_declared: args.all_income_declared,
            all_expenses_claimed: args.all_expenses_claimed,
            adjustments_reviewed: args.adjustments_reviewed,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn require_owner(owner: Option<&str>) -> Result<&str> {
    owner
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .context("--owner is required for this command")
}

fn open_csv(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open: {}", path.display()))
}

fn print_period(period: &TaxPeriod) {
    println!(
        "{:>4}  {}  {} to {}  due {}  {:<9}  income {:>12}  expenses {:>12}",
        period.id,
        period.period_key,
        period.start_date,
        period.end_date,
        period.deadline_date,
        period.status.as_str(),
        period.total_income,
        period.total_expenses,
    );
}

fn print_vat_return(vat_return: &VatReturn) {
    let boxes = &vat_return.boxes;
    println!(
        "VAT return {} ({} to {})",
        vat_return.period_key, vat_return.period_start, vat_return.period_end
    );
    for (label, value) in [
        ("Box 1 VAT due on sales", boxes.box1),
        ("Box 2 VAT due on acquisitions", boxes.box2),
        ("Box 3 Total VAT due", boxes.box3),
        ("Box 4 VAT reclaimed", boxes.box4),
        ("Box 5 Net VAT", boxes.box5),
        ("Box 6 Sales ex VAT", boxes.box6),
        ("Box 7 Purchases ex VAT", boxes.box7),
        ("Box 8 Supplies to EU", boxes.box8),
        ("Box 9 Acquisitions from EU", boxes.box9),
    ] {
        println!("  {label:<32} {value:>12}");
    }
    println!("Readiness: {}%", vat_return.readiness.score);
    for task in &vat_return.readiness.outstanding {
        println!("  - {}", task.description());
    }
}

fn print_statement(statement: &YearEndStatement) {
    println!("End of Period Statement {}", statement.tax_year);
    println!("  Income            {:>12}", statement.total_income);
    println!("  Expenses          {:>12}", statement.total_expenses);
    println!("  Net profit        {:>12}", statement.net_profit);
    println!("  Adjustments       {:>12}", statement.adjustments.net_adjustment);
    println!("  Taxable profit    {:>12}", statement.taxable_profit);
    println!("  Income tax        {:>12}", statement.income_tax.tax);
    println!("  Class 4 NIC       {:>12}", statement.nic.nic);
    println!("  Tax due           {:>12}", statement.tax_due);
}

async fn run(cli: &Cli, repo: &dyn MtdRepository) -> Result<()> {
    let owner = cli.owner.as_deref();

    match &cli.command {
        Command::Init { tax_year, scheme } => {
            let machine = PeriodStateMachine::new(repo, owner)?;
            let periods = machine
                .initialize_quarters(*tax_year, (*scheme).into())
                .await
                .with_context(|| format!("Failed to initialise tax year {tax_year}"))?;
            periods.iter().for_each(print_period);
        }
        Command::Periods { tax_year, overdue } => {
            let machine = PeriodStateMachine::new(repo, owner)?;
            let periods = if *overdue {
                machine
                    .overdue_periods(*tax_year, Utc::now().date_naive())
                    .await?
            } else {
                machine.periods(*tax_year).await?
            };
            if periods.is_empty() {
                println!("No periods for tax year {tax_year}; run `mtd init {tax_year}` first.");
            }
            periods.iter().for_each(print_period);
        }
        Command::Refresh { period_id } => {
            let period = PeriodStateMachine::new(repo, owner)?
                .refresh_totals(*period_id)
                .await?;
            print_period(&period);
        }
        Command::Submit { period_id } => {
            let period = PeriodStateMachine::new(repo, owner)?
                .submit(*period_id)
                .await?;
            print_period(&period);
        }
        Command::Reopen {
            period_id,
            reason,
            kind,
        } => {
            let amendment = PeriodStateMachine::new(repo, owner)?
                .reopen_with_type(*period_id, reason, (*kind).into())
                .await?;
            println!(
                "Reopened period {period_id}; amendment {} records income {} and expenses {}",
                amendment.id, amendment.previous_income, amendment.previous_expenses
            );
        }
        Command::Resubmit { period_id } => {
            let amendment = PeriodStateMachine::new(repo, owner)?
                .submit_amended_period(*period_id)
                .await?;
            println!(
                "Period {period_id} corrected: income changed by {}, expenses by {}",
                amendment.income_difference, amendment.expenses_difference
            );
        }
        Command::Amendments { period_id } => {
            let history = AmendmentLedger::new(repo, owner)?
                .history(*period_id)
                .await?;
            for amendment in &history {
                let state = match amendment.submitted_at {
                    Some(at) => format!("filed {}", at.format("%Y-%m-%d %H:%M")),
                    None => "open".to_string(),
                };
                println!(
                    "{:>4}  {:<15}  {:<20}  income {} -> {}  expenses {} -> {}  {}",
                    amendment.id,
                    amendment.amendment_type.as_str(),
                    state,
                    amendment.previous_income,
                    amendment.new_income,
                    amendment.previous_expenses,
                    amendment.new_expenses,
                    amendment.reason,
                );
            }
        }
        Command::ImportIncome { file } => {
            let owner = require_owner(owner)?;
            let records = TransactionLoader::parse_income(open_csv(file)?)
                .with_context(|| format!("Failed to parse CSV: {}", file.display()))?;
            let count = TransactionLoader::load_income(repo, owner, &records)
                .await
                .context("Failed to import income")?;
            println!("Imported {count} income transactions.");
        }
        Command::ImportExpenses { file } => {
            let owner = require_owner(owner)?;
            let records = TransactionLoader::parse_expenses(open_csv(file)?)
                .with_context(|| format!("Failed to parse CSV: {}", file.display()))?;
            let count = TransactionLoader::load_expenses(repo, owner, &records)
                .await
                .context("Failed to import expenses")?;
            println!("Imported {count} expense transactions.");
        }
        Command::ImportAdjustments { file } => {
            let owner = require_owner(owner)?;
            let records = TransactionLoader::parse_adjustments(open_csv(file)?)
                .with_context(|| format!("Failed to parse CSV: {}", file.display()))?;
            let count = TransactionLoader::load_adjustments(repo, owner, &records)
                .await
                .context("Failed to import adjustments")?;
            println!("Imported {count} adjustments.");
        }
        Command::Profile {
            business_name,
            vat_number,
            hmrc_connected,
        } => {
            let owner = require_owner(owner)?;
            let mut profile = repo
                .get_business_profile(owner)
                .await?
                .unwrap_or_else(|| BusinessProfile::empty(owner));
            if let Some(name) = business_name {
                profile.business_name = Some(name.clone());
            }
            if let Some(number) = vat_number {
                profile.vat_number = Some(number.clone());
            }
            if let Some(connected) = hmrc_connected {
                profile.hmrc_connected = *connected;
            }
            repo.upsert_business_profile(&profile).await?;
            println!("{profile:#?}");
        }
        Command::Vat { period_id, record } => {
            let filing = VatFiling::new(repo, owner)?;
            let vat_return = filing.prepare(*period_id).await?;
            print_vat_return(&vat_return);
            if *record {
                let saved = filing.record(*period_id).await?;
                println!("Recorded VAT submission {}", saved.id);
            }
        }
        Command::Eops {
            tax_year,
            action,
            declarations,
        } => {
            let filing = EopsFiling::new(repo, owner)?;
            let statement = filing.preview(*tax_year).await?;
            print_statement(&statement);
            match action {
                EopsAction::Preview => {}
                EopsAction::Draft => {
                    let saved = filing
                        .save_draft(*tax_year, declarations.into())
                        .await?;
                    println!("Saved draft statement {}", saved.id);
                }
                EopsAction::Submit => {
                    let saved = filing.submit(*tax_year, declarations.into()).await?;
                    println!("Statement {} is {}", saved.id, saved.status.as_str());
                }
            }
        }
        Command::Tax { profit, tax_year } => {
            let rates = repo
                .get_tax_year_rates(*tax_year)
                .await
                .with_context(|| format!("No rates configured for tax year {tax_year}"))?;
            let calculator = TaxCalculator::new(rates)?;
            let income_tax = calculator.income_tax(*profit);
            let nic = calculator.nic4(*profit);

            println!("Personal allowance {:>12}", income_tax.personal_allowance);
            for band in income_tax.breakdown.iter().chain(&nic.breakdown) {
                println!(
                    "  {:<28} {:>12} {:>12}",
                    band.band_label, band.amount_in_band, band.tax_for_band
                );
            }
            println!("Income tax         {:>12}", income_tax.tax);
            println!("Class 4 NIC        {:>12}", nic.nic);
            println!("Total              {:>12}", calculator.total_liability(*profit));
            println!("Effective rate     {:>12}", calculator.effective_rate(*profit));
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    debug!(?cli, "Parsed arguments");

    let config = DbConfig {
        backend: cli.backend.clone(),
        connection_string: cli.db.clone(),
    };
    let repo = build_registry()
        .create(&config)
        .await
        .with_context(|| format!(
                "Failed to open {} backend at {}",
                config.backend, config.connection_string
            ))?;

    run(&cli, repo.as_ref()).await
}
