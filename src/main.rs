use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use graph_retriever::edges::EdgeSpec;
use graph_retriever::embeddings::OpenAIEmbedder;
use graph_retriever::graph::DocumentGraph;
use graph_retriever::store::{RetryingStore, SqliteStore};
use graph_retriever::strategy::StrategyKind;
use graph_retriever::traversal::{CancellationToken, Traversal, TraversalResult};
use graph_retriever::{Config, Content};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "graph-retriever")]
#[command(about = "Vector-seeded graph traversal over a SQLite node store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert or replace nodes from a JSON Lines file
    Load {
        /// One node per line: {"id", "content", "metadata", "embedding"?}
        path: PathBuf,
        /// Store nodes without embeddings instead of embedding them
        #[arg(long)]
        skip_embed: bool,
    },
    /// Embed a query and traverse from its nearest nodes
    Search {
        query: String,
        /// eager or mmr (defaults to [traversal].strategy)
        #[arg(long)]
        strategy: Option<StrategyKind>,
        #[arg(long)]
        max_depth: Option<usize>,
        #[arg(long)]
        select_k: Option<usize>,
        #[arg(long)]
        start_k: Option<usize>,
        #[arg(long)]
        adjacent_k: Option<usize>,
        /// Explicit root node id (repeatable)
        #[arg(long = "root")]
        roots: Vec<String>,
        /// Also print the community partition of the result
        #[arg(long)]
        communities: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config may set the default log level; RUST_LOG still wins
    let config = Config::load();
    let default_level = config
        .as_ref()
        .map(|c| c.retriever.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", default_level)).init();
    let config = config?;

    match cli.command {
        Command::Load { path, skip_embed } => run_load(&config, &path, skip_embed).await,
        Command::Search {
            query,
            strategy,
            max_depth,
            select_k,
            start_k,
            adjacent_k,
            roots,
            communities,
            json,
        } => {
            let mut options = config.traversal.clone();
            if let Some(strategy) = strategy {
                options.strategy = strategy;
            }
            if let Some(max_depth) = max_depth {
                options.max_depth = max_depth;
            }
            if let Some(select_k) = select_k {
                options.select_k = select_k;
            }
            if let Some(start_k) = start_k {
                options.start_k = start_k;
            }
            if let Some(adjacent_k) = adjacent_k {
                options.adjacent_k = adjacent_k;
            }
            if !roots.is_empty() {
                options.initial_roots = roots;
            }
            run_search(&config, options, &query, communities, json).await
        }
    }
}

fn build_embedder(config: &Config) -> Result<OpenAIEmbedder> {
    Ok(OpenAIEmbedder::new(
        config.api_key()?,
        config.embeddings.model.clone(),
        config.embeddings.batch_size,
        config.embeddings.dimensions,
        config.retry,
    )?)
}

fn read_nodes(path: &Path) -> Result<Vec<Content>> {
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut nodes = Vec::new();
    for (i, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let content: Content = serde_json::from_str(&line)
            .with_context(|| format!("Invalid node on line {} of {}", i + 1, path.display()))?;
        nodes.push(content);
    }
    Ok(nodes)
}

async fn run_load(config: &Config, path: &Path, skip_embed: bool) -> Result<()> {
    let start = Instant::now();
    let mut nodes = read_nodes(path)?;
    log::info!("Read {} nodes from {}", nodes.len(), path.display());

    let missing: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.embedding.is_none())
        .map(|(i, _)| i)
        .collect();
    if !missing.is_empty() && !skip_embed {
        let embedder = build_embedder(config)?;
        let texts: Vec<String> = missing.iter().map(|&i| nodes[i].content.clone()).collect();
        log::info!("Embedding {} nodes", texts.len());
        let embeddings = embedder.embed_batch(texts).await?;
        for (i, embedding) in missing.into_iter().zip(embeddings) {
            nodes[i].embedding = Some(embedding);
        }
    }

    let store = SqliteStore::open(config.db_path()).await?;
    let written = store.add_contents(nodes).await?;
    let total = store.count().await?;
    log::info!(
        "Loaded {} nodes into {} ({} total) in {:?}",
        written,
        config.db_path().display(),
        total,
        start.elapsed()
    );
    Ok(())
}

async fn run_search(
    config: &Config,
    options: graph_retriever::TraversalOptions,
    query: &str,
    communities: bool,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!("Query cannot be empty");
    }
    options.validate()?;

    let embedder = build_embedder(config)?;
    let query_embedding = embedder.embed_query(query).await?;

    let store = RetryingStore::new(SqliteStore::open(config.db_path()).await?, config.retry);

    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, returning partial results");
            on_interrupt.cancel();
        }
    });

    let start = Instant::now();
    let edges = EdgeSpec::Rules(options.edges.clone());
    let result = Traversal::new(&store, options)
        .with_cancellation(token)
        .run(Some(&query_embedding))
        .await?;
    log::info!("Traversal took {:?}", start.elapsed());

    let partition = communities.then(|| DocumentGraph::build(&result.nodes, &edges).communities());

    if json {
        let output = serde_json::json!({
            "query": query,
            "result": result,
            "communities": partition,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_result(query, &result);
        if let Some(partition) = partition {
            println!("\nCommunities:");
            for community in partition {
                println!("  [{}] {}", community.id, community.members.join(", "));
            }
        }
    }
    Ok(())
}

fn print_result(query: &str, result: &TraversalResult) {
    println!(
        "Query: {}\n{} nodes ({} expanded, {} rounds{})\n",
        query,
        result.nodes.len(),
        result.visited_ids.len(),
        result.rounds,
        if result.cancelled { ", cancelled" } else { "" }
    );
    for (i, node) in result.nodes.iter().enumerate() {
        let snippet: String = node.content.chars().take(120).collect();
        println!(
            "{:>3}. {} (depth {}, score {:.4})\n     {}",
            i + 1,
            node.id,
            node.depth,
            node.similarity_score,
            snippet.replace('\n', " ")
        );
    }
}
