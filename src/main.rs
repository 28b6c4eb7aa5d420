mod builder;
mod bundler;
mod calls;
mod chain;
mod config;
mod coordinator;
mod decode;
mod encoding;
mod error;
mod estimator;
mod gate;
mod history;
mod packing;
mod payment;
mod sponsor;
mod types;

use anyhow::{anyhow, bail, Context, Result};
use bundler::BundlerClient;
use chain::EthersChain;
use clap::{Args, Parser, Subcommand};
use config::{load_deployment, Deployment};
use coordinator::{CoordinatorDeps, ExecuteOptions, ExecutionCoordinator};
use ethers::prelude::*;
use ethers::utils::parse_ether;
use gate::{ConfirmationGate, OperationIntent};
use history::{HistoryClient, HistoryQuery, HistoryStore};
use packing::UserOpSigner;
use sponsor::{SponsorClient, UnconfiguredSponsor};
use std::io::Write as _;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use types::PaymentSelection;

#[derive(Parser, Debug)]
#[command(name = "aa-userop", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the counterfactual smart account address (and deployment status).
    Account(AccountArgs),

    /// Build, confirm, sign and submit a UserOperation.
    Send(SendArgs),

    /// List the ERC-20 tokens the configured paymaster accepts for gas.
    Tokens(TokensArgs),

    /// Show past user operations for the smart account.
    History(HistoryArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Deployment artifact (chain endpoints + contract addresses).
    #[arg(long, default_value = "deployments/sepolia.json")]
    deployment: PathBuf,

    /// Override the chain RPC URL (otherwise uses deployment JSON).
    #[arg(long, env = "AA_USEROP_RPC_URL")]
    rpc: Option<String>,

    /// Smart account owner private key.
    ///
    /// Recommended: set via env var AA_USEROP_OWNER_PRIVATE_KEY.
    #[arg(long, env = "AA_USEROP_OWNER_PRIVATE_KEY")]
    owner_private_key: Option<String>,

    /// CREATE2 salt for the smart account.
    #[arg(long, default_value_t = 0)]
    salt: u64,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Call target (the smart account's execute destination).
    #[arg(long)]
    to: Option<String>,

    /// ETH to attach, as a decimal string (e.g. "0.05").
    #[arg(long, default_value = "0")]
    value_eth: String,

    /// Inner calldata for the target, hex-encoded. Empty for a plain transfer.
    #[arg(long)]
    data: Option<String>,

    /// Batch call as "to[:value_eth[:hexdata]]"; repeat for multiple calls.
    #[arg(long = "call", conflicts_with = "to")]
    calls: Vec<String>,

    /// Sponsor gas through the configured verifying paymaster service.
    #[arg(long, default_value_t = false)]
    sponsor_gas: bool,

    /// Pay gas in ERC-20 through the token paymaster.
    #[arg(long, default_value_t = false)]
    pay_with_token: bool,

    /// Token to pay gas with (with --pay-with-token; defaults to the
    /// deployment's default token).
    #[arg(long)]
    gas_token: Option<String>,

    /// Skip the interactive confirmation prompt.
    #[arg(long, default_value_t = false)]
    yes: bool,

    /// Do not send the UserOperation; only build, estimate and sign.
    #[arg(long)]
    dry_run: bool,

    /// Do not wait for the userOp receipt.
    #[arg(long)]
    no_wait: bool,

    /// Max seconds to wait for the userOp receipt. Use 0 to disable timeout.
    #[arg(long, default_value_t = 180)]
    max_wait_seconds: u64,
}

#[derive(Args, Debug)]
struct TokensArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Max rows to return.
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Rows to skip (for paging).
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Only rows whose action type matches (e.g. "ETH Transfer", "approve").
    #[arg(long)]
    action: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Logs go to stderr so stdout stays usable for script-friendly output.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Account(args) => cmd_account(args).await,
        Command::Send(args) => cmd_send(args).await,
        Command::Tokens(args) => cmd_tokens(args).await,
        Command::History(args) => cmd_history(args).await,
    }
}

/// Everything the subcommands share: a chain-checked provider, the owner
/// wallet and the resolved smart account address.
struct Session {
    dep: Deployment,
    chain: Arc<EthersChain<SignerMiddleware<Provider<Http>, LocalWallet>>>,
    wallet: LocalWallet,
    account: Address,
    deployed: bool,
}

async fn open_session(common: &CommonArgs) -> Result<Session> {
    let dep = load_deployment(&common.deployment, common.rpc.clone())?;

    let provider =
        Provider::<Http>::try_from(dep.rpc_url.as_str())?.interval(Duration::from_millis(350));

    let chain_id = provider.get_chainid().await?.as_u64();
    if chain_id != dep.chain_id {
        return Err(anyhow!(
            "chainId mismatch: deployment has {}, RPC returned {}",
            dep.chain_id,
            chain_id
        ));
    }

    let key = common
        .owner_private_key
        .as_deref()
        .context("missing owner key: set AA_USEROP_OWNER_PRIVATE_KEY or pass --owner-private-key")?;
    let wallet = LocalWallet::from_str(key.trim())
        .context("invalid owner private key")?
        .with_chain_id(chain_id);

    let client = Arc::new(SignerMiddleware::new(provider, wallet.clone()));
    let chain = Arc::new(EthersChain::new(client, dep.entry_point));

    let (account, deployed) = chain
        .counterfactual_account(dep.factory, wallet.address(), U256::from(common.salt))
        .await?;

    Ok(Session {
        dep,
        chain,
        wallet,
        account,
        deployed,
    })
}

async fn cmd_account(args: AccountArgs) -> Result<()> {
    let session = open_session(&args.common).await?;

    println!("chainId:        {}", session.dep.chain_id);
    println!("entryPoint:     {}", encoding::fmt_address(session.dep.entry_point));
    println!("factory:        {}", encoding::fmt_address(session.dep.factory));
    println!("owner:          {}", encoding::fmt_address(session.wallet.address()));
    println!("smartAccount:   {}", encoding::fmt_address(session.account));
    println!("isDeployed:     {}", session.deployed);

    Ok(())
}

async fn cmd_tokens(args: TokensArgs) -> Result<()> {
    let session = open_session(&args.common).await?;

    let tokens = session
        .chain
        .supported_paymaster_tokens(session.dep.token_paymaster)
        .await?;
    if tokens.is_empty() {
        println!("the token paymaster currently accepts no tokens");
        return Ok(());
    }

    println!("tokens accepted by {}:", encoding::fmt_address(session.dep.token_paymaster));
    for (address, name, symbol, decimals) in tokens {
        println!(
            "  {}  {} ({}, {} decimals)",
            encoding::fmt_address(address),
            name,
            symbol,
            decimals
        );
    }
    Ok(())
}

async fn cmd_history(args: HistoryArgs) -> Result<()> {
    let session = open_session(&args.common).await?;

    let url = session
        .dep
        .history_url
        .clone()
        .context("deployment has no historyUrl configured")?;
    let store = HistoryClient::new(url);

    let query = HistoryQuery {
        limit: args.limit,
        offset: args.offset,
        action_type: args.action.clone(),
    };
    let rows = store.query(session.account, &query).await?;

    if rows.is_empty() {
        println!("no user operations recorded for {}", encoding::fmt_address(session.account));
        return Ok(());
    }

    for row in rows {
        let status = if row.success { "ok" } else { "failed" };
        println!(
            "{}  [{}] {} via {} (nonce {}, block {})",
            row.user_op_hash, status, row.action_type, row.payment_method, row.nonce, row.block_number
        );
    }
    Ok(())
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let session = open_session(&args.common).await?;
    let dep = &session.dep;

    let call_data = if !args.calls.is_empty() {
        let mut batch = Vec::with_capacity(args.calls.len());
        for spec in &args.calls {
            batch.push(parse_batch_call(spec)?);
        }
        calls::encode_execute_batch(&batch)?
    } else {
        let to = args
            .to
            .as_deref()
            .context("pass --to, or one or more --call entries")?;
        let to = Address::from_str(to).context("invalid --to address")?;
        let value = parse_ether(args.value_eth.as_str())
            .map_err(|e| anyhow!("invalid --value-eth: {e}"))?;
        let inner = match args.data.as_deref() {
            Some(s) => encoding::parse_bytes(s).context("invalid hex in --data")?,
            None => Bytes::default(),
        };
        calls::encode_execute(to, value, inner)?
    };

    let selection = payment_selection(&args, dep)?;

    let deployment_payload = if session.deployed {
        None
    } else {
        tracing::info!(
            account = %encoding::fmt_address(session.account),
            "account not deployed yet, operation will include deployment"
        );
        Some(builder::DeploymentPayload {
            factory: dep.factory,
            factory_data: session
                .chain
                .deployment_factory_data(session.wallet.address(), U256::from(args.common.salt))?,
        })
    };

    let sponsor: Arc<dyn sponsor::SponsorApi> = match dep.sponsor_url.clone() {
        Some(url) => Arc::new(SponsorClient::new(url)),
        None => Arc::new(UnconfiguredSponsor),
    };
    let history: Arc<dyn HistoryStore> = match dep.history_url.clone() {
        Some(url) => Arc::new(HistoryClient::new(url)),
        None => Arc::new(history::MemoryHistory::default()),
    };

    let (gate, mut intents) = ConfirmationGate::channel();
    let coordinator = Arc::new(ExecutionCoordinator::new(CoordinatorDeps {
        chain: session.chain.clone(),
        bundler: Arc::new(BundlerClient::new(dep.bundler_url.clone())),
        sponsor,
        history,
        gate: gate.clone(),
        signer: UserOpSigner::new(session.wallet.clone(), dep.chain_id, dep.entry_point),
        sender: session.account,
        entry_point: dep.entry_point,
        token_paymaster: dep.token_paymaster,
        default_token: dep.default_token,
    }));

    let options = ExecuteOptions {
        deployment: deployment_payload,
        overrides: builder::GasOverrides::default(),
        dry_run: args.dry_run,
        wait_for_receipt: !args.no_wait,
        receipt_timeout: Duration::from_secs(args.max_wait_seconds),
    };

    let mut exec = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.execute_call_data(call_data, &options).await }
    });

    let outcome = loop {
        tokio::select! {
            res = &mut exec => break res.context("execution task panicked")?,
            intent = intents.recv() => {
                let Some(intent) = intent else { continue };
                print_intent(&intent, &selection);
                if args.yes || prompt_confirmation().await? {
                    gate.confirm(selection.clone());
                } else {
                    gate.cancel();
                }
            }
        }
    };

    if let Some(hash) = outcome.user_op_hash {
        println!("userOpHash:      {}", encoding::fmt_h256(hash));
    }
    if let Some(tx) = outcome.transaction_hash {
        println!("transactionHash: {}", encoding::fmt_h256(tx));
    }
    if let Some(block) = outcome.block_number {
        println!("blockNumber:     {}", block);
    }

    if !outcome.success {
        bail!(outcome
            .error
            .unwrap_or_else(|| "user operation failed".to_string()));
    }
    if args.dry_run {
        println!("dry run: operation built, estimated and signed; nothing sent");
    } else {
        println!("status:          success");
    }
    Ok(())
}

fn parse_batch_call(spec: &str) -> Result<(Address, U256, Bytes)> {
    let mut parts = spec.splitn(3, ':');
    let to = parts
        .next()
        .filter(|s| !s.is_empty())
        .with_context(|| format!("--call entry {spec:?} is missing a target address"))?;
    let to = Address::from_str(to).with_context(|| format!("invalid address in --call {spec:?}"))?;
    let value = match parts.next() {
        Some(v) if !v.is_empty() => {
            parse_ether(v).map_err(|e| anyhow!("invalid value in --call {spec:?}: {e}"))?
        }
        _ => U256::zero(),
    };
    let data = match parts.next() {
        Some(d) if !d.is_empty() => {
            encoding::parse_bytes(d).with_context(|| format!("invalid hex in --call {spec:?}"))?
        }
        _ => Bytes::default(),
    };
    Ok((to, value, data))
}

fn payment_selection(args: &SendArgs, dep: &Deployment) -> Result<PaymentSelection> {
    if args.sponsor_gas && args.pay_with_token {
        bail!("--sponsor-gas and --pay-with-token are mutually exclusive");
    }
    if args.sponsor_gas {
        return Ok(PaymentSelection::Sponsored);
    }
    if args.pay_with_token {
        let token = match args.gas_token.as_deref() {
            Some(s) => Some(Address::from_str(s).context("invalid --gas-token address")?),
            None => dep.default_token,
        };
        return Ok(PaymentSelection::Token { token });
    }
    Ok(PaymentSelection::Native)
}

fn print_intent(intent: &OperationIntent, selection: &PaymentSelection) {
    println!("about to submit: {}", intent.decoded.function_name);
    for op in &intent.decoded.operations {
        match op.target {
            Some(target) => println!(
                "  {} -> {} (value {} wei)",
                op.function_name,
                encoding::fmt_address(target),
                op.value
            ),
            None => println!("  {} (value {} wei)", op.function_name, op.value),
        }
    }
    println!("payment:         {}", selection.label());
    println!(
        "estimated gas:   {} wei (~{} ETH)",
        intent.gas.total_gas_wei, intent.gas.total_gas_eth
    );
}

async fn prompt_confirmation() -> Result<bool> {
    let answer = tokio::task::spawn_blocking(|| -> std::io::Result<bool> {
        print!("confirm? [y/N] ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(matches!(line.trim(), "y" | "Y" | "yes"))
    })
    .await
    .context("confirmation prompt task panicked")?;
    Ok(answer?)
}
