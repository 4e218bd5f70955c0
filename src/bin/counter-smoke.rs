/*!
 * Counter application smoke test
 *
 * Sends one `increment` mutation to a counter application served by a local
 * node, prints the result and optionally reads the value back or watches the
 * chain's notifications.
 *
 * Usage:
 *   cargo run --bin counter-smoke -- --chain <chain-id> --application <app-id>
 *   cargo run --bin counter-smoke -- --chain <id> --application <id> --query --watch 3
 *   RUST_LOG=gql_operation_client=debug cargo run --bin counter-smoke -- ...
 */

use std::env;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use futures::StreamExt;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use gql_operation_client::{ClientBuilder, Dispatch, Operation, OperationClient};

const INCREMENT_COUNTER: &str = "mutation Increment($value: Int!) { increment(value: $value) }";
const GET_COUNTER_VALUE: &str = "query { value }";
const WATCH_NOTIFICATIONS: &str =
    "subscription Notifications($chainId: ChainId!) { notifications(chainId: $chainId) }";

struct Args {
    host: String,
    port: u16,
    chain_id: String,
    application_id: String,
    query: bool,
    watch: usize,
}

fn usage() {
    println!("Counter application smoke test");
    println!();
    println!("Usage:");
    println!("  counter-smoke --chain <chain-id> --application <application-id> [options]");
    println!();
    println!("Options:");
    println!("  --host <host>          Node host (default: localhost)");
    println!("  --port <port>          Node service port (default: 8080)");
    println!("  --chain <id>           Chain id");
    println!("  --application <id>     Application id");
    println!("  --query                Read the counter value after incrementing");
    println!("  --watch <n>            Print the next n chain notifications");
    println!("  --help                 Show this help message");
    println!();
    println!("Environment Variables:");
    println!("  COUNTER_CHAIN_ID       Chain id (alternative to --chain)");
    println!("  COUNTER_APPLICATION_ID Application id (alternative to --application)");
    println!("  RUST_LOG               Log filter, e.g. gql_operation_client=debug");
}

fn parse_args() -> Result<Option<Args>> {
    let mut args = Args {
        host: "localhost".to_string(),
        port: 8080,
        chain_id: env::var("COUNTER_CHAIN_ID").unwrap_or_default(),
        application_id: env::var("COUNTER_APPLICATION_ID").unwrap_or_default(),
        query: false,
        watch: 0,
    };

    let mut raw = env::args().skip(1);
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--host" => args.host = raw.next().context("--host needs a value")?,
            "--port" => {
                args.port = raw
                    .next()
                    .context("--port needs a value")?
                    .parse()
                    .context("--port must be a port number")?
            }
            "--chain" => args.chain_id = raw.next().context("--chain needs a value")?,
            "--application" => {
                args.application_id = raw.next().context("--application needs a value")?
            }
            "--query" => args.query = true,
            "--watch" => {
                args.watch = raw
                    .next()
                    .context("--watch needs a value")?
                    .parse()
                    .context("--watch must be a number")?
            }
            "--help" | "-h" => {
                usage();
                return Ok(None);
            }
            other => bail!("unknown argument: {}", other),
        }
    }

    if args.chain_id.is_empty() || args.application_id.is_empty() {
        bail!("both --chain and --application are required (see --help)");
    }

    Ok(Some(args))
}

fn pass(step: &str, started: Instant) {
    println!(
        "  {} {} {}",
        "PASS".green().bold(),
        step,
        format!("({}ms)", started.elapsed().as_millis()).bright_black()
    );
}

fn fail(step: &str, detail: &dyn std::fmt::Display) {
    println!("  {} {}", "FAIL".red().bold(), step);
    println!("    {}", detail.to_string().red());
}

async fn increment(client: &OperationClient) -> Result<()> {
    let started = Instant::now();
    let operation = Operation::named(INCREMENT_COUNTER, "Increment")?.with_variables(json!({"value": 1}));

    match client.dispatch(operation).await {
        Dispatch::Response(Ok(data)) => {
            pass("increment", started);
            println!("    Increment result: {}", data);
            Ok(())
        }
        Dispatch::Response(Err(error)) => {
            fail("increment", &error);
            Err(error).context("increment mutation failed")
        }
        Dispatch::Stream(_) => bail!("increment was classified as a subscription"),
    }
}

async fn read_value(client: &OperationClient) -> Result<()> {
    let started = Instant::now();
    match client.query(GET_COUNTER_VALUE, None).await {
        Ok(data) => {
            pass("value", started);
            println!("    Value result: {}", data);
            Ok(())
        }
        Err(error) => {
            fail("value", &error);
            Err(error).context("value query failed")
        }
    }
}

async fn watch(client: &OperationClient, chain_id: &str, count: usize) -> Result<()> {
    let started = Instant::now();
    let operation = Operation::named(WATCH_NOTIFICATIONS, "Notifications")?
        .with_variables(json!({"chainId": chain_id}));

    let mut notifications = client.subscribe(&operation).await?;
    let mut seen = 0;
    while seen < count {
        match notifications.next().await {
            Some(Ok(event)) => {
                seen += 1;
                println!("    Notification {}: {}", seen, event);
            }
            Some(Err(error)) => {
                fail("notifications", &error);
                return Err(error).context("notification stream failed");
            }
            None => {
                println!("    {}", "stream completed by server".yellow());
                break;
            }
        }
    }
    notifications.cancel();
    pass(&format!("notifications ({} received)", seen), started);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let client = ClientBuilder::application(
        &format!("http://{}:{}", args.host, args.port),
        &format!("ws://{}:{}", args.host, args.port),
        &args.chain_id,
        &args.application_id,
    )
    .build()
    .context("invalid client configuration")?;

    println!("{}", "Counter smoke test".bold());
    println!("  {}", client.config().http_url.cyan());

    increment(&client).await?;

    if args.query {
        read_value(&client).await?;
    }

    if args.watch > 0 {
        watch(&client, &args.chain_id, args.watch).await?;
    }

    client.close().await;
    Ok(())
}
