use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use consultancy_payments::{
    config::{self, AppConfig},
    db::{self, DbPool},
    migrator,
    models::order::{OrderStatus, OrderSummary},
    notifications::NotificationDispatcher,
    services::{ConsultationService, EntitlementWriter, OrderLedger},
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(config.log_level(), config.log_json);

    if let Commands::Migrate = cli.command {
        migrator::run_migration(&config.database_url).await?;
        println!("Migrations applied");
        return Ok(());
    }

    let context = CliContext::initialize(config).await?;
    match cli.command {
        Commands::Migrate => {}
        Commands::Orders(command) => handle_orders_command(&context, command, cli.json).await?,
        Commands::Consultations(command) => {
            handle_consultations_command(&context, command, cli.json).await?
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "payments-cli",
    about = "Operator CLI for payment orders and consultations",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    #[command(subcommand)]
    Orders(OrdersCommands),
    #[command(subcommand)]
    Consultations(ConsultationsCommands),
}

#[derive(Subcommand)]
enum OrdersCommands {
    /// Show an order and the entitlements it granted
    Show(OrderShowArgs),
}

#[derive(Args)]
struct OrderShowArgs {
    id: Uuid,
}

#[derive(Subcommand)]
enum ConsultationsCommands {
    /// List consultations still waiting for a price
    Pending(PendingArgs),
    /// Price a consultation and make it payable
    Activate(ActivateArgs),
}

#[derive(Args)]
struct PendingArgs {
    #[arg(long, default_value_t = 1)]
    page: u64,
    #[arg(long, default_value_t = 20)]
    per_page: u64,
}

#[derive(Args)]
struct ActivateArgs {
    order_id: Uuid,
    #[arg(long)]
    price: Decimal,
    #[arg(long)]
    staff_id: Uuid,
}

struct CliContext {
    ledger: OrderLedger,
    entitlements: EntitlementWriter,
    consultations: ConsultationService,
}

impl CliContext {
    async fn initialize(config: AppConfig) -> Result<Self> {
        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db: Arc<DbPool> = Arc::new(db_pool);

        let notifications = NotificationDispatcher::from_config(&config)
            .context("failed to configure notifications")?;
        let ledger = OrderLedger::new(db.clone());

        Ok(Self {
            entitlements: EntitlementWriter::new(db),
            consultations: ConsultationService::new(
                ledger.clone(),
                notifications,
                config.default_currency.clone(),
            ),
            ledger,
        })
    }
}

async fn handle_orders_command(context: &CliContext, command: OrdersCommands, json: bool) -> Result<()> {
    match command {
        OrdersCommands::Show(args) => {
            let order = context.ledger.get(args.id).await?;
            let entitlements = context.entitlements.list_for_order(order.id).await?;
            let summary = OrderSummary::try_from(order)?;

            if json {
                #[derive(Serialize)]
                struct Output<'a> {
                    order: &'a OrderSummary,
                    entitlements: usize,
                }
                print_json(&Output {
                    order: &summary,
                    entitlements: entitlements.len(),
                })?;
            } else {
                print_order(&summary);
                println!("  entitlements: {}", entitlements.len());
                for entitlement in entitlements {
                    println!(
                        "    {} {} {} expires {}",
                        entitlement.item_id,
                        entitlement.billing_period,
                        entitlement.status,
                        entitlement
                            .expiry_date
                            .map(|d| d.to_rfc3339())
                            .unwrap_or_else(|| "never".into())
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_consultations_command(
    context: &CliContext,
    command: ConsultationsCommands,
    json: bool,
) -> Result<()> {
    match command {
        ConsultationsCommands::Pending(args) => {
            let (orders, total) = context
                .consultations
                .list(Some(OrderStatus::FreeConsultation), args.page, args.per_page)
                .await?;
            let summaries = orders
                .into_iter()
                .map(OrderSummary::try_from)
                .collect::<Result<Vec<_>, _>>()?;

            if json {
                print_json(&summaries)?;
            } else if summaries.is_empty() {
                println!("No consultations waiting for a price.");
            } else {
                println!("Consultations awaiting price ({} total):", total);
                for summary in &summaries {
                    println!(
                        "  {}  buyer {}  requested {}",
                        summary.id,
                        summary.buyer_id,
                        summary.created_at.to_rfc3339()
                    );
                }
            }
        }
        ConsultationsCommands::Activate(args) => {
            let order = context
                .consultations
                .activate(args.order_id, args.price, args.staff_id)
                .await?;
            let summary = OrderSummary::try_from(order)?;
            if json {
                print_json(&summary)?;
            } else {
                println!("Consultation {} priced at {} {}", summary.id, summary.amount, summary.currency);
                print_order(&summary);
            }
        }
    }
    Ok(())
}

fn print_order(order: &OrderSummary) {
    println!("Order {}", order.id);
    println!("  buyer:     {}", order.buyer_id);
    println!("  status:    {}", order.status);
    println!("  amount:    {} {}", order.amount, order.currency);
    println!(
        "  reference: {}",
        order.external_reference.as_deref().unwrap_or("-")
    );
    println!("  items:");
    for item in &order.line_items {
        println!(
            "    {} {} {} ({})",
            item.item_kind, item.item_id, item.price, item.billing_period
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
