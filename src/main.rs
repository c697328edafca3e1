use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use rag_db_agent::agents::{Agent, DatabaseAgent, QueryAgent};
use rag_db_agent::config::Settings;
use rag_db_agent::db::Database;
use rag_db_agent::external::{
    create_embedding_model, create_llm_client, create_vector_store, EmbeddingModel, LLMClient,
    Metadata, VectorStoreKind,
};
use rag_db_agent::mcp::{McpClient, McpServer};
use rag_db_agent::rag::{Generator, RagPipeline, TextChunker};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive question answering (default)
    Chat,

    /// Answer a single question and exit
    Ask {
        /// The question
        #[arg(required = true)]
        query: Vec<String>,
    },

    /// Add .md and .txt files to the knowledge base
    Ingest {
        /// Files or directories to read
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Store each file as a single document
        #[arg(long)]
        no_chunk: bool,
    },

    /// Run the MCP server over a SQLite database
    Serve {
        /// Bind address, defaults to MCP_SERVER_HOST
        #[arg(long)]
        host: Option<String>,

        /// Port, defaults to MCP_SERVER_PORT
        #[arg(short, long)]
        port: Option<u16>,

        /// Database file, defaults to DATABASE_PATH
        #[arg(short, long)]
        database: Option<PathBuf>,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Build the knowledge-base agent from the configured services
async fn build_agent(settings: &Settings) -> Result<DatabaseAgent> {
    settings
        .validate()
        .map_err(|e| anyhow!("Configuration error: {}", e))?;

    tracing::info!(provider = %settings.embedding.provider, model = %settings.embedding.model, "Initializing embedding model");
    let embedder: Arc<dyn EmbeddingModel> = Arc::from(create_embedding_model(&settings.embedding)?);

    tracing::info!(kind = %settings.vector_db.kind, collection = %settings.vector_db.collection_name, "Initializing vector store");
    let store = create_vector_store(&settings.vector_db, &settings.embedding, embedder).await?;

    tracing::info!(provider = %settings.llm.provider, model = %settings.llm.model, "Initializing LLM");
    let llm: Arc<dyn LLMClient> = Arc::from(create_llm_client(&settings.llm)?);

    let chunker = TextChunker::new(settings.rag.chunk_size, settings.rag.chunk_overlap)?;
    let pipeline = RagPipeline::new(
        store,
        Generator::new(llm, settings.llm.temperature),
        chunker,
        settings.rag.top_k_results,
    );

    let mcp = McpClient::from_config(&settings.mcp, settings.agent.timeout_secs)?;
    tracing::info!(url = %mcp.base_url(), "MCP client ready");

    Ok(DatabaseAgent::new(
        Arc::new(pipeline),
        mcp,
        settings.agent.max_iterations,
    ))
}

fn read_line(prompt: &str, buffer: &mut String) -> Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    buffer.clear();
    if io::stdin().read_line(buffer)? == 0 {
        return Ok(None);
    }
    Ok(Some(buffer.trim().to_string()))
}

/// REPL keywords are matched case-insensitively
fn is_keyword(input: &str, keywords: &[&str]) -> bool {
    keywords
        .iter()
        .any(|keyword| input.eq_ignore_ascii_case(keyword))
}

fn print_help() {
    println!("\nCommands:");
    println!("  exit     - Leave the session");
    println!("  help     - Show this message");
    println!("  add      - Add a document to the knowledge base");
    println!("  history  - Show the last 10 queries");
    println!("Anything else is answered from the knowledge base.\n");
}

async fn add_interactively(agent: &DatabaseAgent, buffer: &mut String) -> Result<()> {
    println!("Enter the document text. Finish with a line containing only 'done'.");
    let mut lines = Vec::new();
    while let Some(line) = read_line("", buffer)? {
        if is_keyword(&line, &["done"]) {
            break;
        }
        lines.push(line);
    }

    let document = lines.join("\n");
    if document.trim().is_empty() {
        println!("Nothing to add.");
        return Ok(());
    }

    match agent.add_knowledge(vec![document], None, true).await {
        Ok(added) => println!("Added {} chunks to the knowledge base.", added.count),
        Err(e) => println!("Error adding document: {}", e),
    }
    Ok(())
}

async fn answer(agent: &mut DatabaseAgent, query: &str) {
    match agent.process(query, None).await {
        Ok(answer) => {
            println!("\n{}\n", answer.answer);
            println!("(based on {} documents)", answer.num_documents);
        }
        Err(e) => println!("Error: {:#}", e),
    }
}

async fn chat(settings: &Settings) -> Result<()> {
    let mut agent = build_agent(settings).await?;
    let mut query_agent = QueryAgent::new(settings.agent.max_iterations);
    let mut buffer = String::new();

    println!("Welcome to the RAG database agent!");
    print_help();

    while let Some(input) = read_line("> ", &mut buffer)? {
        match input.to_lowercase().as_str() {
            "" => continue,
            "exit" | "quit" => break,
            "help" => print_help(),
            "add" => add_interactively(&agent, &mut buffer).await?,
            "history" => {
                let history = query_agent.history();
                if history.is_empty() {
                    println!("No queries yet.");
                }
                for entry in history.iter().rev().take(10).rev() {
                    println!(
                        "[{}] ({}) {}",
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.query_type,
                        entry.query
                    );
                }
            }
            _ => {
                let analysis = query_agent.analyze(&input, None);
                println!("Query type: {}", analysis.query_type);
                for suggestion in &analysis.suggestions {
                    println!("Tip: {}", suggestion);
                }
                answer(&mut agent, &input).await;
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let extension = entry.path().extension().and_then(|e| e.to_str()).unwrap_or("");
            if extension == "md" || extension == "txt" {
                files.push(entry.path().to_path_buf());
            }
        }
    }
    files
}

async fn ingest(settings: &Settings, paths: &[PathBuf], chunk: bool) -> Result<()> {
    if settings.vector_db.kind == VectorStoreKind::Memory {
        bail!(
            "Cannot ingest into the memory vector store: its contents are lost when the process exits. \
             Set VECTOR_DB_TYPE=qdrant, or use `add` inside `chat`."
        );
    }

    let files = collect_files(paths);
    if files.is_empty() {
        println!("No .md or .txt files found.");
        return Ok(());
    }

    let agent = build_agent(settings).await?;
    let mut documents = Vec::new();
    let mut metadatas = Vec::new();
    for file in &files {
        let text = std::fs::read_to_string(file)?;
        if text.trim().is_empty() {
            tracing::warn!(file = %file.display(), "Skipping empty file");
            continue;
        }
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), Value::from(file.display().to_string()));
        documents.push(text);
        metadatas.push(metadata);
    }

    if documents.is_empty() {
        println!("All files were empty.");
        return Ok(());
    }

    let count = documents.len();
    let added = agent.add_knowledge(documents, Some(metadatas), chunk).await?;
    println!("Added {} chunks from {} files.", added.count, count);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let settings = Settings::from_env()?;
    init_logging(&settings.logging.log_level);

    match args.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(&settings).await,
        Command::Ask { query } => {
            let mut agent = build_agent(&settings).await?;
            let answer = agent.process(&query.join(" "), None).await?;
            println!("{}", answer.answer);
            println!("\n(based on {} documents)", answer.num_documents);
            Ok(())
        }
        Command::Ingest { paths, no_chunk } => ingest(&settings, &paths, !no_chunk).await,
        Command::Serve {
            host,
            port,
            database,
        } => {
            let path = database.unwrap_or_else(|| PathBuf::from(&settings.database.path));
            let db = Database::open(&path)?;
            let host = host.unwrap_or_else(|| settings.mcp.host.clone());
            let port = port.unwrap_or(settings.mcp.port);
            McpServer::with_database(db).serve(&host, port).await
        }
    }
}
