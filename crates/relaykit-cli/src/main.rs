use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use relaykit_core::{
    ChatClient, ChatRequest, DashScopeEmbeddingClient, DashScopeRequest, DashScopeResult,
    EncodingFormat, OpenAiEmbeddingClient, OpenAiEmbeddingRequest, ProviderRegistry, RetryPolicy,
    TextEmbeddingRequest, ToolConversation, default_provider_path, mask_secret,
    registry::PROVIDER_ENV_VAR,
};
use relaykit_sheets::{InsertDataOption, SheetRef, SheetsClient, SheetsCredentials};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod tools;

use tools::{MockSearchTools, load_tools, tool_names};

const DEFAULT_AGENT_SYSTEM_PROMPT: &str = "You answer questions about a knowledge base \
that you can only reach through the provided search tools. Use the tools before answering, \
prefer several searches with different phrasings, and never mention tool names to the user.";

#[derive(Parser)]
#[command(name = "relaykit")]
#[command(version)]
#[command(about = "Retrying client for LLM chat, embedding and Feishu spreadsheet APIs")]
struct Cli {
    /// Path to the provider file
    #[arg(short, long, global = true, env = PROVIDER_ENV_VAR)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Retry without waiting, at most 3 attempts
    #[arg(long, global = true)]
    fast_retry: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured providers
    Providers,

    /// Run one chat completion
    Chat {
        #[arg(short, long)]
        provider: String,

        #[arg(short, long)]
        model: String,

        /// System prompt
        #[arg(short, long)]
        system: Option<String>,

        /// File whose contents are appended to the prompt
        #[arg(long)]
        content_file: Option<PathBuf>,

        #[arg(long)]
        max_tokens: Option<u32>,

        #[arg(long)]
        temperature: Option<f32>,

        /// Ask the model for a JSON object
        #[arg(long)]
        json_mode: bool,

        /// Print the full result record as JSON
        #[arg(long)]
        output_json: bool,

        prompt: String,
    },

    /// Create embeddings
    Embed {
        #[command(subcommand)]
        target: EmbedTarget,
    },

    /// Answer a question through the tool-call loop with mock search tools
    Agent {
        #[arg(short, long)]
        provider: String,

        #[arg(short, long)]
        model: String,

        /// Tool definitions, `{"tools": [...]}` or a bare array
        #[arg(short, long)]
        tools: PathBuf,

        #[arg(long, default_value_t = 3)]
        max_rounds: u32,

        #[arg(short, long)]
        system: Option<String>,

        query: String,
    },

    /// Feishu spreadsheet operations
    Sheets {
        #[command(flatten)]
        credentials: FeishuArgs,

        #[command(subcommand)]
        action: SheetsAction,
    },
}

#[derive(Subcommand)]
enum EmbedTarget {
    /// OpenAI-compatible `/embeddings` endpoint
    Openai {
        #[arg(short, long)]
        provider: String,

        #[arg(short, long)]
        model: String,

        #[arg(long)]
        dimensions: Option<u32>,

        /// "float" or "base64"
        #[arg(long, default_value = "float")]
        encoding_format: String,

        #[arg(long)]
        output_json: bool,

        text: String,
    },

    /// DashScope native text or multimodal embedding API
    Dashscope {
        #[arg(short, long)]
        provider: String,

        /// Names containing "multimodal" select the multimodal API
        #[arg(short, long)]
        model: String,

        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        image_url: Option<String>,

        #[arg(long)]
        video_url: Option<String>,

        #[arg(long)]
        dimensions: Option<u32>,

        /// "dense", "sparse" or "dense&sparse"
        #[arg(long)]
        output_type: Option<String>,

        #[arg(long)]
        output_json: bool,
    },
}

#[derive(Args)]
struct FeishuArgs {
    /// Defaults to $FEISHU_APP_ID
    #[arg(long)]
    app_id: Option<String>,

    /// Defaults to $FEISHU_APP_SECRET
    #[arg(long)]
    app_secret: Option<String>,
}

#[derive(Args)]
struct SheetSelector {
    #[arg(long)]
    sheet_id: Option<String>,

    #[arg(long)]
    sheet_name: Option<String>,
}

#[derive(Subcommand)]
enum SheetsAction {
    /// Fetch a tenant access token
    Token,

    /// List the sheets of a spreadsheet
    List { spreadsheet: String },

    /// Print a sheet's contents
    Read {
        spreadsheet: String,

        #[command(flatten)]
        sheet: SheetSelector,

        #[arg(long)]
        output_json: bool,
    },

    /// Append a cell below the last filled cell of a column
    Append {
        spreadsheet: String,

        #[command(flatten)]
        sheet: SheetSelector,

        #[arg(long, default_value = "A")]
        column: String,

        /// OVERWRITE or INSERT_ROWS
        #[arg(long, default_value = "OVERWRITE")]
        insert_option: InsertDataOption,

        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --debug
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let policy = if cli.fast_retry {
        RetryPolicy::immediate().with_max_attempts(3)
    } else {
        RetryPolicy::default()
    };

    match cli.command {
        Commands::Providers => cmd_providers(&cli.config),
        Commands::Chat {
            provider,
            model,
            system,
            content_file,
            max_tokens,
            temperature,
            json_mode,
            output_json,
            prompt,
        } => {
            let mut request = ChatRequest::new(provider, model, prompt);
            if let Some(system) = system {
                request = request.with_system_prompt(system);
            }
            if let Some(path) = content_file {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read content file: {}", path.display()))?;
                request = request.with_content(content);
            }
            if let Some(max_tokens) = max_tokens {
                request = request.with_max_tokens(max_tokens);
            }
            if let Some(temperature) = temperature {
                request = request.with_temperature(temperature);
            }
            if json_mode {
                request = request.with_response_format(serde_json::json!({"type": "json_object"}));
            }
            cmd_chat(&cli.config, policy, &request, output_json).await
        }
        Commands::Embed { target } => cmd_embed(&cli.config, policy, target).await,
        Commands::Agent {
            provider,
            model,
            tools,
            max_rounds,
            system,
            query,
        } => {
            let system = system.unwrap_or_else(|| DEFAULT_AGENT_SYSTEM_PROMPT.to_string());
            let request = ChatRequest::new(provider, model, query).with_system_prompt(system);
            cmd_agent(&cli.config, policy, request, &tools, max_rounds).await
        }
        Commands::Sheets {
            credentials,
            action,
        } => cmd_sheets(credentials, action).await,
    }
}

fn load_registry(config_path: &Option<PathBuf>) -> Result<Arc<ProviderRegistry>> {
    let path = config_path.clone().unwrap_or_else(default_provider_path);
    debug!("Using provider file {}", path.display());
    let registry = ProviderRegistry::try_load(&path)
        .with_context(|| format!("Failed to load provider file: {}", path.display()))?;
    Ok(Arc::new(registry))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_providers(config_path: &Option<PathBuf>) -> Result<()> {
    let path = config_path.clone().unwrap_or_else(default_provider_path);
    let registry = ProviderRegistry::load(&path);

    println!("Provider file: {}", path.display());
    if registry.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }
    for provider in registry.iter() {
        println!(
            "  {:<20} {:<50} key: {}",
            provider.name,
            provider.base_url,
            mask_secret(&provider.api_key)
        );
    }
    Ok(())
}

async fn cmd_chat(
    config_path: &Option<PathBuf>,
    policy: RetryPolicy,
    request: &ChatRequest,
    output_json: bool,
) -> Result<()> {
    let client = ChatClient::new(load_registry(config_path)?).with_policy(policy);
    let completion = client.complete(request).await?;

    if output_json {
        return print_json(&completion);
    }
    println!("{}", completion.result);
    println!(
        "\n[tokens in/out: {}/{}, attempts: {}, elapsed: {:.2}s]",
        completion.input_tokens,
        completion.output_tokens,
        completion.attempts,
        completion.elapsed.as_secs_f64()
    );
    Ok(())
}

fn preview(values: &[f32]) -> String {
    let head: Vec<String> = values.iter().take(5).map(|v| format!("{:.6}", v)).collect();
    format!("[{}{}]", head.join(", "), if values.len() > 5 { ", ..." } else { "" })
}

async fn cmd_embed(
    config_path: &Option<PathBuf>,
    policy: RetryPolicy,
    target: EmbedTarget,
) -> Result<()> {
    let registry = load_registry(config_path)?;

    match target {
        EmbedTarget::Openai {
            provider,
            model,
            dimensions,
            encoding_format,
            output_json,
            text,
        } => {
            let format: EncodingFormat = encoding_format.parse()?;
            let mut request =
                OpenAiEmbeddingRequest::new(provider, model, text).with_encoding_format(format);
            if let Some(dimensions) = dimensions {
                request = request.with_dimensions(dimensions);
            }
            let result = OpenAiEmbeddingClient::new(registry)
                .with_policy(policy)
                .embed(&request)
                .await?;

            if output_json {
                return print_json(&result);
            }
            for (i, vector) in result.result.iter().enumerate() {
                match vector.as_floats() {
                    Some(values) => {
                        println!("#{} dimension {}: {}", i, values.len(), preview(values))
                    }
                    None => println!("#{} base64 encoded", i),
                }
            }
            println!(
                "[tokens: {}, attempts: {}, elapsed: {:.2}s]",
                result.total_tokens.unwrap_or(0),
                result.attempts,
                result.elapsed.as_secs_f64()
            );
        }
        EmbedTarget::Dashscope {
            provider,
            model,
            text,
            image_url,
            video_url,
            dimensions,
            output_type,
            output_json,
        } => {
            let mut request =
                DashScopeRequest::for_model(&provider, &model, text, image_url, video_url);
            if let DashScopeRequest::Text(text_request) = &mut request {
                apply_text_options(text_request, dimensions, output_type);
            }
            let result = DashScopeEmbeddingClient::new(registry)
                .with_policy(policy)
                .embed(&request)
                .await?;

            if output_json {
                return print_json(&result);
            }
            for embedding in result.embeddings() {
                let kind = embedding.kind.as_deref().unwrap_or("text");
                match &embedding.embedding {
                    Some(values) => println!(
                        "#{} ({}) dimension {}: {}",
                        embedding.index,
                        kind,
                        values.len(),
                        preview(values)
                    ),
                    None => println!("#{} ({}) no dense vector", embedding.index, kind),
                }
                if let Some(sparse) = &embedding.sparse_embedding {
                    println!("   sparse entries: {}", sparse.len());
                }
            }
            if let DashScopeResult::Multimodal(mm) = &result {
                println!(
                    "[images: {}, video seconds: {:.1}]",
                    mm.image_count, mm.video_duration
                );
            }
            println!(
                "[tokens: {}, elapsed: {:.2}s]",
                result.total_tokens().unwrap_or(0),
                result.elapsed().as_secs_f64()
            );
        }
    }
    Ok(())
}

fn apply_text_options(
    request: &mut TextEmbeddingRequest,
    dimensions: Option<u32>,
    output_type: Option<String>,
) {
    request.dimensions = dimensions;
    request.output_type = output_type;
}

async fn cmd_agent(
    config_path: &Option<PathBuf>,
    policy: RetryPolicy,
    request: ChatRequest,
    tools_path: &Path,
    max_rounds: u32,
) -> Result<()> {
    let tools = load_tools(tools_path)?;
    info!("Loaded {} tool(s): {}", tools.len(), tool_names(&tools).join(", "));

    let chat = ChatClient::new(load_registry(config_path)?).with_policy(policy);
    let request = request
        .with_tools(tools)
        .with_tool_choice(serde_json::json!("auto"));

    let outcome = ToolConversation::new(&chat)
        .with_max_rounds(max_rounds)
        .run(request, &MockSearchTools)
        .await?;

    println!("{}", outcome.final_completion.result);
    println!(
        "\n[rounds: {}, tools used: {}, tokens in/out: {}/{}]",
        outcome.rounds,
        if outcome.tools_used.is_empty() {
            "none".to_string()
        } else {
            outcome.tools_used.join(", ")
        },
        outcome.input_tokens,
        outcome.output_tokens
    );
    if outcome.final_completion.has_tool_calls() {
        println!("Stopped at the round limit with tool calls still pending.");
    }
    Ok(())
}

fn sheets_credentials(args: FeishuArgs) -> Result<SheetsCredentials> {
    match (args.app_id, args.app_secret) {
        (Some(id), Some(secret)) => {
            let mut credentials = SheetsCredentials::new(id, secret);
            if let Ok(base_url) = std::env::var(relaykit_sheets::client::BASE_URL_VAR) {
                if !base_url.is_empty() {
                    credentials = credentials.with_base_url(base_url);
                }
            }
            Ok(credentials)
        }
        (None, None) => Ok(SheetsCredentials::from_env()?),
        _ => bail!("--app-id and --app-secret must be given together"),
    }
}

async fn cmd_sheets(args: FeishuArgs, action: SheetsAction) -> Result<()> {
    let client = SheetsClient::new(sheets_credentials(args)?);

    match action {
        SheetsAction::Token => {
            let token = client.tenant_access_token().await?;
            println!("{}", token);
        }
        SheetsAction::List { spreadsheet } => {
            let sheets = client.list_sheets(&spreadsheet).await?;
            if sheets.is_empty() {
                println!("No sheets found.");
            }
            for sheet in sheets {
                println!("{:<12} {:<10} {}", sheet.sheet_id, sheet.resource_type, sheet.title);
            }
        }
        SheetsAction::Read {
            spreadsheet,
            sheet,
            output_json,
        } => {
            let sheet = SheetRef::from_options(sheet.sheet_id, sheet.sheet_name)?;
            let table = client.read_sheet(&spreadsheet, &sheet).await?;
            if output_json {
                return print_json(&table);
            }
            if table.is_empty() {
                println!("No data found.");
                return Ok(());
            }
            println!("{}", table.columns.join("\t"));
            for row in &table.rows {
                println!("{}", row.join("\t"));
            }
            println!("\n[{} row(s)]", table.len());
        }
        SheetsAction::Append {
            spreadsheet,
            sheet,
            column,
            insert_option,
            value,
        } => {
            let sheet = SheetRef::from_options(sheet.sheet_id, sheet.sheet_name)?;
            let data = client
                .append_cell(&spreadsheet, &sheet, &column, &value, insert_option)
                .await?;
            print_json(&data)?;
        }
    }
    Ok(())
}
