use std::{str::FromStr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use bakery_orders::{
    config::{self, AppConfig},
    db,
    events,
    models::{order::OrderDetails, Cart, Order, OrderStatus, PaymentMethod},
    repositories::NewCoupon,
    services::{
        Actor, CheckoutKind, CheckoutReceipt, CheckoutRequest, CouponLookup, CouponPolicy,
        CouponValidator,
    },
    AppState,
};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize(matches!(cli.command, Commands::Migrate)).await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.state.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Products(command) => handle_products_command(&context, command, cli.json).await?,
        Commands::Coupons(command) => handle_coupons_command(&context, command, cli.json).await?,
        Commands::Orders(command) => handle_orders_command(&context, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "bakery", about = "Bakery order engine CLI", version)]
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
    Products(ProductsCommands),
    #[command(subcommand)]
    Coupons(CouponsCommands),
    #[command(subcommand)]
    Orders(OrdersCommands),
}

#[derive(Subcommand)]
enum ProductsCommands {
    Add(AddProductArgs),
    Get(IdArgs),
}

#[derive(Subcommand)]
enum CouponsCommands {
    Add(AddCouponArgs),
    Check(CheckCouponArgs),
}

#[derive(Subcommand)]
enum OrdersCommands {
    Checkout(CheckoutArgs),
    Get(GetOrderArgs),
    Folio(FolioArgs),
    List(ListOrdersArgs),
    Ready(TransitionArgs),
    Deliver(DeliverArgs),
    Cancel(TransitionArgs),
    Unclaimed(TransitionArgs),
}

#[derive(Args)]
struct IdArgs {
    #[arg(long, help = "Numeric identifier")]
    id: i32,
}

#[derive(Args)]
struct AddProductArgs {
    #[arg(long, help = "Display name for the product")]
    name: String,
    #[arg(long, value_parser = parse_decimal, help = "Current unit price")]
    price: Decimal,
}

#[derive(Args)]
struct AddCouponArgs {
    #[arg(long, help = "Unique coupon code")]
    code: String,
    #[arg(long, value_parser = parse_decimal, help = "Percentage off the subtotal (0-100)")]
    percentage: Decimal,
    #[arg(long, value_parser = parse_datetime, help = "Start of validity (RFC3339, defaults to now)")]
    valid_from: Option<DateTime<Utc>>,
    #[arg(long, value_parser = parse_datetime, help = "End of validity (RFC3339)")]
    valid_until: DateTime<Utc>,
    #[arg(long, help = "Maximum number of redemptions")]
    usage_limit: Option<i32>,
}

#[derive(Args)]
struct CheckCouponArgs {
    #[arg(long)]
    code: String,
    #[arg(long, value_parser = parse_decimal)]
    subtotal: Decimal,
}

#[derive(Args)]
struct CheckoutArgs {
    #[arg(
        long = "item",
        required = true,
        value_parser = parse_cart_item,
        action = ArgAction::Append,
        help = "Cart line in key=value pairs (e.g. product_id=3,quantity=2[,note=no sugar])"
    )]
    items: Vec<CartItemInput>,
    #[arg(long, value_parser = parse_payment_method, help = "cash, credit or debit")]
    payment: PaymentMethod,
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Customer placing the order")]
    customer_id: Option<Uuid>,
    #[arg(long, action = ArgAction::SetTrue, help = "Place an express order (folio + PIN pickup)")]
    express: bool,
    #[arg(long, help = "Coupon code (scheduled orders only)")]
    coupon: Option<String>,
    #[arg(long, value_parser = parse_datetime, help = "Requested pickup time (RFC3339)")]
    pickup_at: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct GetOrderArgs {
    #[arg(long, conflicts_with = "number", required_unless_present = "number")]
    id: Option<i32>,
    #[arg(long, help = "Six-digit order number")]
    number: Option<i32>,
}

#[derive(Args)]
struct FolioArgs {
    #[arg(help = "Express order folio")]
    folio: String,
}

#[derive(Args)]
struct ListOrdersArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), conflicts_with = "status")]
    customer_id: Option<Uuid>,
    #[arg(long, value_parser = parse_status, required_unless_present = "customer_id")]
    status: Option<OrderStatus>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ActorArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Act as staff member")]
    employee_id: Option<Uuid>,
    #[arg(long = "as-customer", value_parser = clap::value_parser!(Uuid), help = "Act as customer")]
    as_customer: Option<Uuid>,
}

impl ActorArgs {
    fn actor(&self) -> Result<Actor> {
        match (self.employee_id, self.as_customer) {
            (Some(employee_id), None) => Ok(Actor::Staff { employee_id }),
            (None, Some(customer_id)) => Ok(Actor::Customer { customer_id }),
            _ => Err(anyhow!("exactly one of --employee-id or --as-customer is required")),
        }
    }
}

#[derive(Args)]
struct TransitionArgs {
    #[arg(long)]
    id: i32,
    #[command(flatten)]
    actor: ActorArgs,
}

#[derive(Args)]
struct DeliverArgs {
    #[arg(long)]
    id: i32,
    #[arg(long, help = "PIN presented by the customer (express orders)")]
    pin: Option<String>,
    #[command(flatten)]
    actor: ActorArgs,
}

#[derive(Debug, Clone)]
struct CartItemInput {
    product_id: i32,
    quantity: i32,
    note: Option<String>,
}

struct CliContext {
    state: AppState,
}

impl CliContext {
    async fn initialize(skip_auto_migrate: bool) -> Result<Self> {
        let config: AppConfig = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate && !skip_auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }

        let (event_sender, event_rx) = events::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(db_pool), config, Some(Arc::new(event_sender)));
        Ok(Self { state })
    }
}

async fn handle_products_command(
    context: &CliContext,
    command: ProductsCommands,
    json: bool,
) -> Result<()> {
    match command {
        ProductsCommands::Add(args) => {
            let product = context
                .state
                .products
                .create(&args.name, args.price)
                .await
                .context("failed to create product")?;
            if json {
                print_json(&product)?;
            } else {
                println!("Product {} • {} • {}", product.id, product.name, product.price);
            }
        }
        ProductsCommands::Get(args) => {
            let product = context
                .state
                .products
                .find_by_id(args.id)
                .await
                .context("failed to load product")?;
            if json {
                print_json(&product)?;
            } else {
                println!("Product {} • {} • {}", product.id, product.name, product.price);
            }
        }
    }
    Ok(())
}

async fn handle_coupons_command(
    context: &CliContext,
    command: CouponsCommands,
    json: bool,
) -> Result<()> {
    match command {
        CouponsCommands::Add(args) => {
            let coupon = context
                .state
                .coupons
                .create(NewCoupon {
                    code: args.code,
                    discount_percentage: args.percentage,
                    valid_from: args.valid_from.unwrap_or_else(Utc::now),
                    valid_until: args.valid_until,
                    usage_limit: args.usage_limit,
                })
                .await
                .context("failed to create coupon")?;
            if json {
                print_json(&coupon)?;
            } else {
                println!(
                    "Coupon {} • {}% • valid until {}",
                    coupon.code, coupon.discount_percentage, coupon.valid_until
                );
            }
        }
        CouponsCommands::Check(args) => {
            let lookup: Arc<dyn CouponLookup> = context.state.coupons.clone();
            let validator =
                CouponValidator::with_policy(lookup, CouponPolicy::from(&context.state.config));
            let result = validator
                .validate(&args.code, args.subtotal)
                .await
                .context("failed to validate coupon")?;
            if json {
                print_json(&result)?;
            } else if result.valid {
                println!("Valid: discount {}", result.discount_amount);
            } else {
                println!("Not applicable: {}", result.message);
            }
        }
    }
    Ok(())
}

async fn handle_orders_command(
    context: &CliContext,
    command: OrdersCommands,
    json: bool,
) -> Result<()> {
    let state = &context.state;
    match command {
        OrdersCommands::Checkout(args) => {
            let receipt = checkout(state, args).await?;
            if json {
                print_json(&receipt)?;
            } else {
                render_receipt(&receipt);
            }
        }
        OrdersCommands::Get(args) => {
            let details = match (args.id, args.number) {
                (Some(id), _) => state.orders.find_by_id(id).await?,
                (None, Some(number)) => state
                    .orders
                    .find_by_order_number(number)
                    .await?
                    .ok_or_else(|| anyhow!("order number {} not found", number))?,
                (None, None) => return Err(anyhow!("--id or --number is required")),
            };
            render_details(&details, json)?;
        }
        OrdersCommands::Folio(args) => {
            let details = state
                .orders
                .find_by_folio(&args.folio)
                .await?
                .ok_or_else(|| anyhow!("folio {} not found", args.folio))?;
            render_details(&details, json)?;
        }
        OrdersCommands::List(args) => {
            let orders = match (args.customer_id, args.status) {
                (Some(customer_id), _) => state.orders.list_by_customer(customer_id).await?,
                (None, Some(status)) => state.orders.list_by_status(status).await?,
                (None, None) => return Err(anyhow!("--customer-id or --status is required")),
            };
            if json {
                print_json(&orders)?;
            } else if orders.is_empty() {
                println!("No orders found");
            } else {
                orders.iter().for_each(render_order);
            }
        }
        OrdersCommands::Ready(args) => {
            let order = state.lifecycle.mark_ready(args.id, args.actor.actor()?).await?;
            render_transition(&order, json)?;
        }
        OrdersCommands::Deliver(args) => {
            let order = state
                .lifecycle
                .deliver(args.id, args.actor.actor()?, args.pin.as_deref())
                .await?;
            render_transition(&order, json)?;
        }
        OrdersCommands::Cancel(args) => {
            let order = state.lifecycle.cancel(args.id, args.actor.actor()?).await?;
            render_transition(&order, json)?;
        }
        OrdersCommands::Unclaimed(args) => {
            let order = state
                .lifecycle
                .mark_unclaimed(args.id, args.actor.actor()?)
                .await?;
            render_transition(&order, json)?;
        }
    }
    Ok(())
}

async fn checkout(state: &AppState, args: CheckoutArgs) -> Result<CheckoutReceipt> {
    let mut cart = Cart::new();
    for item in args.items {
        let product = state
            .products
            .find_by_id(item.product_id)
            .await
            .with_context(|| format!("failed to load product {}", item.product_id))?;
        cart.add(product, item.quantity, item.note);
    }

    let kind = if args.express {
        if args.coupon.is_some() {
            return Err(anyhow!("coupons apply to scheduled orders only"));
        }
        CheckoutKind::Express {
            customer_id: args.customer_id,
            pickup_at: args.pickup_at,
        }
    } else {
        CheckoutKind::Scheduled {
            customer_id: args
                .customer_id
                .ok_or_else(|| anyhow!("--customer-id is required for scheduled orders"))?,
            coupon_code: args.coupon,
            pickup_at: args.pickup_at,
        }
    };

    state
        .checkout
        .checkout(CheckoutRequest {
            cart,
            kind,
            payment_method: args.payment,
        })
        .await
        .context("checkout failed")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_order(order: &Order) {
    println!(
        "- Order #{:06} (id {}) • {} • {} • total {}",
        order.order_number,
        order.id.unwrap_or_default(),
        order.kind.order_type(),
        order.status,
        order.total_amount
    );
}

fn render_details(details: &OrderDetails, json: bool) -> Result<()> {
    if json {
        return print_json(details);
    }
    render_order(&details.order);
    if let Some(folio) = details.order.kind.folio() {
        println!("  folio {}", folio);
    }
    for item in &details.line_items {
        print!(
            "  {} x product {} @ {} = {}",
            item.quantity, item.product_id, item.unit_price, item.subtotal
        );
        match &item.note {
            Some(note) => println!(" ({})", note),
            None => println!(),
        }
    }
    Ok(())
}

fn render_receipt(receipt: &CheckoutReceipt) {
    render_order(&receipt.details.order);
    println!(
        "  subtotal {} • discount {}",
        receipt.subtotal, receipt.discount
    );
    if let Some(warning) = receipt.coupon_warning() {
        println!("  coupon not applied: {}", warning);
    }
    if let bakery_orders::models::OrderKind::Express { folio, pin } = &receipt.details.order.kind {
        println!("  folio {} • PIN {}", folio, pin);
    }
}

fn render_transition(order: &Order, json: bool) -> Result<()> {
    if json {
        return print_json(order);
    }
    render_order(order);
    if let Some(at) = order.delivered_at {
        println!("  delivered at {}", at.to_rfc3339());
    }
    Ok(())
}

fn parse_cart_item(raw: &str) -> Result<CartItemInput, String> {
    let mut product_id = None;
    let mut quantity = None;
    let mut note = None;

    for part in raw.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| format!("invalid segment '{part}', expected key=value"))?;
        let key = key.trim();
        let value = value.trim();

        match key {
            "product_id" | "product" => {
                let id: i32 = value
                    .parse()
                    .map_err(|_| format!("invalid product id '{value}'"))?;
                product_id = Some(id);
            }
            "quantity" | "qty" => {
                let qty: i32 = value
                    .parse()
                    .map_err(|_| format!("invalid quantity '{value}'"))?;
                if qty <= 0 {
                    return Err("quantity must be positive".to_string());
                }
                quantity = Some(qty);
            }
            "note" => {
                if !value.is_empty() {
                    note = Some(value.to_string());
                }
            }
            other => return Err(format!("unknown key '{other}'")),
        }
    }

    Ok(CartItemInput {
        product_id: product_id.ok_or_else(|| "product_id is required".to_string())?,
        quantity: quantity.unwrap_or(1),
        note,
    })
}

fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw).map_err(|_| format!("invalid decimal '{raw}'"))
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("invalid datetime '{}', expected RFC3339", raw))
}

fn parse_payment_method(raw: &str) -> Result<PaymentMethod, String> {
    PaymentMethod::from_str(raw.trim())
        .map_err(|_| format!("invalid payment method '{raw}', expected cash, credit or debit"))
}

fn parse_status(raw: &str) -> Result<OrderStatus, String> {
    OrderStatus::from_str(raw.trim()).map_err(|_| format!("invalid status '{raw}'"))
}
