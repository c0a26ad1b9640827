use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::application::{BookingService, NewShipment, ServiceConfig, ShipmentFilter, ShipmentUpdate};
use crate::domain::{format_cents, parse_cents, CustomerAccount, Shipment, ShipmentDetails};

/// Waybill - shipment booking back office
#[derive(Parser)]
#[command(name = "waybill")]
#[command(about = "Book shipments against customer wallets and credit limits")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "WAYBILL_DATABASE", default_value = "waybill.db", global = true)]
    pub database: String,

    /// Prefix for generated AWB numbers
    #[arg(long, env = "WAYBILL_AWB_PREFIX", default_value = "WB", global = true)]
    pub awb_prefix: String,

    /// Retries after a conflicting write on the same customer account
    #[arg(long, env = "WAYBILL_MAX_RETRIES", default_value_t = 5, global = true)]
    pub max_retries: u32,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Customer account commands
    #[command(subcommand)]
    Customer(CustomerCommands),

    /// Shipment booking commands
    #[command(subcommand)]
    Shipment(ShipmentCommands),

    /// Show a customer's account statement
    Statement {
        /// Customer account code
        code: String,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Reconcile customers, shipments and ledger rows
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: customers, shipments, ledger, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Limit shipments or ledger rows to one customer
        #[arg(long)]
        customer: Option<String>,
    },

    /// Book shipments in bulk from a CSV file
    Import {
        /// Input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,

        /// Validate without booking
        #[arg(long)]
        dry_run: bool,

        /// Skip rows whose AWB number is already booked
        #[arg(long)]
        skip_duplicates: bool,
    },
}

#[derive(Subcommand)]
pub enum CustomerCommands {
    /// Open a customer account
    Create {
        /// Account code (must be unique)
        code: String,

        /// Customer name
        #[arg(short, long)]
        name: String,

        /// Credit limit (e.g., "5000" or "5000.00")
        #[arg(short, long, default_value = "0")]
        credit_limit: String,

        /// Opening balance; negative for prepaid wallet funds
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        opening_balance: String,
    },

    /// List all customers
    List,

    /// Show a customer account
    Show {
        /// Account code
        code: String,
    },

    /// Add prepaid funds to a customer's wallet
    Recharge {
        /// Account code
        code: String,

        /// Amount to add
        amount: String,
    },

    /// Set the remaining credit limit of a customer
    Credit {
        /// Account code
        code: String,

        /// New credit limit
        limit: String,
    },
}

/// Booking fields shared by create and update.
#[derive(Args, Default)]
pub struct DetailArgs {
    #[arg(long)]
    pub consignee: Option<String>,

    #[arg(long)]
    pub origin: Option<String>,

    #[arg(long)]
    pub destination: Option<String>,

    #[arg(long)]
    pub sector: Option<String>,

    /// Service type (e.g., express, economy)
    #[arg(long)]
    pub service: Option<String>,

    #[arg(long)]
    pub pieces: Option<i64>,

    /// Chargeable weight in kilograms
    #[arg(long)]
    pub weight: Option<f64>,
}

#[derive(Subcommand)]
pub enum ShipmentCommands {
    /// Book a shipment
    Create {
        /// Customer account code
        #[arg(long)]
        customer: String,

        /// Charge for the shipment (e.g., "500.00")
        #[arg(short, long)]
        amount: String,

        /// Use this AWB number instead of generating one
        #[arg(long)]
        awb: Option<String>,

        #[command(flatten)]
        details: DetailArgs,
    },

    /// Change a booked shipment
    Update {
        /// AWB number
        awb: String,

        /// New charge for the shipment
        #[arg(short, long)]
        amount: Option<String>,

        #[command(flatten)]
        details: DetailArgs,
    },

    /// Cancel a shipment and reverse its charge
    Delete {
        /// AWB number
        awb: String,
    },

    /// Show a shipment
    Show {
        /// AWB number
        awb: String,
    },

    /// List shipments
    List {
        /// Filter by customer account code
        #[arg(long)]
        customer: Option<String>,

        /// Only shipments on hold
        #[arg(long)]
        on_hold: bool,

        /// Maximum number of shipments to show
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

/// Install the log subscriber. `RUST_LOG` wins over the verbose flag.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "waybill=debug" } else { "waybill=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

impl Cli {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            awb_prefix: self.awb_prefix.clone(),
            max_retries: self.max_retries,
            ..ServiceConfig::default()
        }
    }

    async fn connect(&self) -> Result<BookingService> {
        let service = BookingService::connect(&self.database)
            .await
            .with_context(|| format!("Failed to open database '{}'. Run 'waybill init' first", self.database))?;
        Ok(service.with_config(self.service_config()))
    }

    pub async fn run(self) -> Result<()> {
        match &self.command {
            Commands::Init => {
                BookingService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Customer(cmd) => {
                let service = self.connect().await?;
                run_customer_command(&service, cmd).await?;
            }

            Commands::Shipment(cmd) => {
                let service = self.connect().await?;
                run_shipment_command(&service, cmd).await?;
            }

            Commands::Statement { code, format } => {
                let service = self.connect().await?;
                run_statement_command(&service, code, format).await?;
            }

            Commands::Check => {
                let service = self.connect().await?;
                run_check_command(&service).await?;
            }

            Commands::Export {
                export_type,
                output,
                customer,
            } => {
                let service = self.connect().await?;
                run_export_command(&service, export_type, output.as_deref(), customer.as_deref())
                    .await?;
            }

            Commands::Import {
                input,
                dry_run,
                skip_duplicates,
            } => {
                let service = self.connect().await?;
                run_import_command(&service, input.as_deref(), *dry_run, *skip_duplicates).await?;
            }
        }

        Ok(())
    }
}

fn parse_amount(value: &str, what: &str) -> Result<i64> {
    parse_cents(value).with_context(|| format!("Invalid {} '{}'. Use '500.00' or '500'", what, value))
}

async fn run_customer_command(service: &BookingService, cmd: &CustomerCommands) -> Result<()> {
    match cmd {
        CustomerCommands::Create {
            code,
            name,
            credit_limit,
            opening_balance,
        } => {
            let credit_limit = parse_amount(credit_limit, "credit limit")?;
            let opening_balance = parse_amount(opening_balance, "opening balance")?;

            let customer = service
                .create_customer(code.clone(), name.clone(), credit_limit, opening_balance)
                .await?;
            println!(
                "Created customer: {} ({}), credit limit {}",
                customer.account_code,
                customer.name,
                format_cents(customer.credit_limit)
            );
        }

        CustomerCommands::List => {
            let customers = service.list_customers().await?;
            if customers.is_empty() {
                println!("No customers found.");
            } else {
                println!(
                    "{:<12} {:<24} {:>14} {:>14}",
                    "CODE", "NAME", "BALANCE", "CREDIT"
                );
                println!("{}", "-".repeat(67));
                for customer in customers {
                    println!(
                        "{:<12} {:<24} {:>14} {:>14}",
                        truncate(&customer.account_code, 12),
                        truncate(&customer.name, 24),
                        format_cents(customer.left_over_balance),
                        format_cents(customer.credit_limit)
                    );
                }
            }
        }

        CustomerCommands::Show { code } => {
            let customer = service.get_customer(code).await?;
            print_customer(&customer);
        }

        CustomerCommands::Recharge { code, amount } => {
            let amount = parse_amount(amount, "amount")?;
            let customer = service.recharge_wallet(code, amount).await?;
            println!(
                "Recharged {} with {}; balance now {}",
                customer.account_code,
                format_cents(amount),
                format_cents(customer.left_over_balance)
            );
        }

        CustomerCommands::Credit { code, limit } => {
            let limit = parse_amount(limit, "credit limit")?;
            let customer = service.set_credit_limit(code, limit).await?;
            println!(
                "Credit limit of {} set to {}",
                customer.account_code,
                format_cents(customer.credit_limit)
            );
        }
    }
    Ok(())
}

async fn run_shipment_command(service: &BookingService, cmd: &ShipmentCommands) -> Result<()> {
    match cmd {
        ShipmentCommands::Create {
            customer,
            amount,
            awb,
            details,
        } => {
            let total_amt = parse_amount(amount, "amount")?;
            let mut new = NewShipment::new(customer.clone(), total_amt).with_details(ShipmentDetails {
                consignee: details.consignee.clone(),
                origin: details.origin.clone(),
                destination: details.destination.clone(),
                sector: details.sector.clone(),
                service: details.service.clone(),
                pieces: details.pieces.unwrap_or(0),
                weight_kg: details.weight.unwrap_or(0.0),
            });
            if let Some(awb) = awb {
                new = new.with_awb(awb.clone());
            }

            let result = service.create_shipment(new).await?;
            println!(
                "Booked shipment {} for {}: {}",
                result.shipment.awb_no,
                result.shipment.customer_code,
                format_cents(result.shipment.total_amt)
            );
            if let Some(reason) = &result.shipment.hold_reason {
                println!("  ON HOLD: {}", reason);
            }
            print_funds(&result.customer);
        }

        ShipmentCommands::Update {
            awb,
            amount,
            details,
        } => {
            let update = ShipmentUpdate {
                total_amt: amount
                    .as_deref()
                    .map(|a| parse_amount(a, "amount"))
                    .transpose()?,
                consignee: details.consignee.clone(),
                origin: details.origin.clone(),
                destination: details.destination.clone(),
                sector: details.sector.clone(),
                service: details.service.clone(),
                pieces: details.pieces,
                weight_kg: details.weight,
            };

            let result = service.update_shipment(awb, update).await?;
            println!(
                "Updated shipment {}: {}",
                result.shipment.awb_no,
                format_cents(result.shipment.total_amt)
            );
            if let Some(reason) = &result.shipment.hold_reason {
                println!("  ON HOLD: {}", reason);
            }
            print_funds(&result.customer);
        }

        ShipmentCommands::Delete { awb } => {
            let result = service.delete_shipment(awb).await?;
            println!(
                "Cancelled shipment {} ({} reversed)",
                result.shipment.awb_no,
                format_cents(result.shipment.total_amt)
            );
            print_funds(&result.customer);
        }

        ShipmentCommands::Show { awb } => {
            let shipment = service.get_shipment(awb).await?;
            print_shipment(&shipment);
        }

        ShipmentCommands::List {
            customer,
            on_hold,
            limit,
        } => {
            let shipments = service
                .list_shipments(ShipmentFilter {
                    customer: customer.clone(),
                    on_hold_only: *on_hold,
                    limit: *limit,
                })
                .await?;

            if shipments.is_empty() {
                println!("No shipments found.");
            } else {
                println!(
                    "{:<14} {:<12} {:<10} {:>12} {:<6} {:<16}",
                    "AWB", "CUSTOMER", "DEST", "AMOUNT", "HOLD", "BOOKED"
                );
                println!("{}", "-".repeat(75));
                for shipment in shipments {
                    println!(
                        "{:<14} {:<12} {:<10} {:>12} {:<6} {:<16}",
                        shipment.awb_no,
                        truncate(&shipment.customer_code, 12),
                        truncate(shipment.details.destination.as_deref().unwrap_or("-"), 10),
                        format_cents(shipment.total_amt),
                        if shipment.is_hold { "yes" } else { "" },
                        shipment.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_statement_command(service: &BookingService, code: &str, format: &str) -> Result<()> {
    let statement = service.statement(code).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&statement)?);
        return Ok(());
    }

    println!(
        "Statement for {} ({})",
        statement.customer.account_code, statement.customer.name
    );
    println!("  Wallet:           {:>14}", format_cents(statement.wallet));
    println!("  Owed:             {:>14}", format_cents(statement.owed));
    println!(
        "  Available credit: {:>14}",
        format_cents(statement.available_credit)
    );
    println!(
        "  On hold:          {:>14} ({} shipments)",
        format_cents(statement.held_amount),
        statement.held_shipments.len()
    );
    println!();

    if statement.entries.is_empty() {
        println!("No ledger entries.");
        return Ok(());
    }

    println!(
        "{:<17} {:<9} {:<14} {:>12} {:>14} {:>14}",
        "DATE", "KIND", "AWB", "AMOUNT", "BALANCE", "CREDIT"
    );
    println!("{}", "-".repeat(85));
    for entry in &statement.entries {
        println!(
            "{:<17} {:<9} {:<14} {:>12} {:>14} {:>14}",
            entry.recorded_at.format("%Y-%m-%d %H:%M"),
            entry.kind,
            entry.awb_no.as_deref().unwrap_or("-"),
            format_cents(entry.amount),
            format_cents(entry.balance_after),
            format_cents(entry.credit_after)
        );
    }
    Ok(())
}

async fn run_check_command(service: &BookingService) -> Result<()> {
    let report = service.check_integrity().await?;

    println!("Integrity check");
    println!("  Customers:      {}", report.customer_count);
    println!("  Shipments:      {}", report.shipment_count);
    println!("  Ledger entries: {}", report.entry_count);
    println!();

    if report.is_ok() {
        println!("All checks passed.");
    } else {
        println!("Found {} issue(s):", report.issues.len());
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("integrity check failed");
    }
    Ok(())
}

async fn run_export_command(
    service: &BookingService,
    export_type: &str,
    output: Option<&str>,
    customer: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let exporter = Exporter::new(service);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    let count = match export_type {
        "customers" => exporter.export_customers_csv(writer).await?,
        "shipments" => exporter.export_shipments_csv(writer, customer).await?,
        "ledger" => exporter.export_ledger_csv(writer, customer).await?,
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full database: {} customers, {} shipments, {} ledger entries",
                    snapshot.customers.len(),
                    snapshot.shipments.len(),
                    snapshot.ledger.len()
                );
            }
            return Ok(());
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: customers, shipments, ledger, full",
                export_type
            );
        }
    };

    if output.is_some() {
        eprintln!("Exported {} {}", count, export_type);
    }
    Ok(())
}

async fn run_import_command(
    service: &BookingService,
    input: Option<&str>,
    dry_run: bool,
    skip_duplicates: bool,
) -> Result<()> {
    use crate::io::{ImportOptions, Importer};
    use std::fs::File;
    use std::io::{stdin, Read};

    let importer = Importer::new(service);

    let reader: Box<dyn Read> = match input {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("Failed to open input file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdin()),
    };

    let options = ImportOptions {
        dry_run,
        skip_duplicates,
    };
    let result = importer.import_shipments_csv(reader, options).await?;

    if dry_run {
        println!("Validation complete");
    } else {
        println!("Import complete");
    }
    println!("  Booked:  {}", result.imported);
    println!("  On hold: {}", result.held);
    println!("  Skipped: {}", result.skipped);
    println!("  Errors:  {}", result.errors.len());

    if !result.errors.is_empty() {
        println!("\nErrors:");
        for error in result.errors.iter().take(10) {
            println!(
                "  Line {}: {}{}",
                error.line,
                error
                    .field
                    .as_ref()
                    .map(|f| format!("{}: ", f))
                    .unwrap_or_default(),
                error.error
            );
        }
        if result.errors.len() > 10 {
            println!("  ... and {} more errors", result.errors.len() - 10);
        }
    }

    Ok(())
}

fn print_customer(customer: &CustomerAccount) {
    let funds = customer.funds();
    println!("Customer: {}", customer.account_code);
    println!("  Name:             {}", customer.name);
    println!(
        "  Created:          {}",
        customer.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!();
    println!(
        "  Balance:          {}",
        format_cents(customer.left_over_balance)
    );
    println!("  Wallet:           {}", format_cents(funds.wallet()));
    println!("  Owed:             {}", format_cents(funds.owed()));
    println!("  Credit limit:     {}", format_cents(customer.credit_limit));
    println!("  Spendable:        {}", format_cents(funds.spendable()));
}

fn print_funds(customer: &CustomerAccount) {
    println!(
        "  {} balance {}, credit {}",
        customer.account_code,
        format_cents(customer.left_over_balance),
        format_cents(customer.credit_limit)
    );
}

fn print_shipment(shipment: &Shipment) {
    let details = &shipment.details;
    println!("Shipment: {}", shipment.awb_no);
    println!("  Customer:    {}", shipment.customer_code);
    println!("  Amount:      {}", format_cents(shipment.total_amt));
    match &shipment.hold_reason {
        Some(reason) if shipment.is_hold => println!("  Hold:        {}", reason),
        _ if shipment.is_hold => println!("  Hold:        yes"),
        _ => {}
    }
    if let Some(consignee) = &details.consignee {
        println!("  Consignee:   {}", consignee);
    }
    println!(
        "  Route:       {} -> {}",
        details.origin.as_deref().unwrap_or("-"),
        details.destination.as_deref().unwrap_or("-")
    );
    if let Some(sector) = &details.sector {
        println!("  Sector:      {}", sector);
    }
    if let Some(service) = &details.service {
        println!("  Service:     {}", service);
    }
    println!(
        "  Pieces:      {} ({} kg)",
        details.pieces, details.weight_kg
    );
    println!(
        "  Booked:      {}",
        shipment.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Updated:     {}",
        shipment.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
}

/// Truncate a string to max_len characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
