use clap::{Parser, Subcommand};
use lexis_context::Document;
use lexis_retriever::{
    GeneratorBackend, QueryOptions, QueryResponse, QueryStatus, RagPipeline, RetrieverConfig,
};
use std::path::{Path, PathBuf};
use std::process;

/// Ingest a knowledge base and answer questions over it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at DEBUG instead of INFO
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "summary")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chunk, embed and index input files
    Ingest {
        /// Text files (one text each), or JSON arrays of records with --documents
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Treat inputs as JSON arrays of field records
        #[arg(short, long)]
        documents: bool,
        /// Empty the index before ingesting
        #[arg(long)]
        reset: bool,
    },
    /// Answer a question from the index
    Query {
        question: String,
        /// Rank by vector similarity only
        #[arg(long)]
        no_rerank: bool,
        /// Number of passages to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Return the passages without calling the answer model
        #[arg(long)]
        retrieve_only: bool,
    },
    /// Show index and pipeline settings
    Stats,
    /// Exercise every component once
    Check,
    /// Empty the index
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = RetrieverConfig::load(args.config.as_deref())?;

    match args.command {
        Commands::Ingest {
            inputs,
            documents,
            reset,
        } => {
            config.generator.backend = GeneratorBackend::Extractive;
            let pipeline = RagPipeline::from_config(config).await?;

            if reset {
                pipeline.reset().await?;
            } else {
                pipeline.load_existing_index().await?;
            }

            let report = if documents {
                let mut records = Vec::new();
                for path in &inputs {
                    records.extend(read_documents(path)?);
                }
                pipeline.ingest_documents(&records).await?
            } else {
                let mut texts = Vec::with_capacity(inputs.len());
                for path in &inputs {
                    texts.push(read_text(path)?);
                }
                pipeline.ingest_texts(&texts).await?
            };

            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Summary => {
                    println!(
                        "Ingested {} {} into {} chunks",
                        report.documents,
                        if documents { "documents" } else { "texts" },
                        report.chunks
                    );
                    if let Some(stats) = &report.chunk_stats {
                        println!(
                            "Chunk length: avg {:.1}, max {}, min {} chars",
                            stats.average_chars, stats.max_chars, stats.min_chars
                        );
                    }
                    if !report.fields.is_empty() {
                        println!("Fields: {}", report.fields.join(", "));
                    }
                    println!(
                        "Index ({}): {} vectors of dimension {} at {}",
                        report.index.backend,
                        report.index.total,
                        report.index.dimension,
                        report.index.location
                    );
                }
            }
            Ok(())
        }
        Commands::Query {
            question,
            no_rerank,
            top_k,
            retrieve_only,
        } => {
            if retrieve_only {
                config.generator.backend = GeneratorBackend::Extractive;
            }
            let pipeline = RagPipeline::from_config(config).await?;
            pipeline.load_existing_index().await?;

            let options = QueryOptions {
                rerank: !no_rerank,
                top_k,
            };
            let response = pipeline.query(&question, options).await?;

            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
                OutputFormat::Summary => print_response(&response),
            }
            Ok(())
        }
        Commands::Stats => {
            config.generator.backend = GeneratorBackend::Extractive;
            let pipeline = RagPipeline::from_config(config).await?;
            pipeline.load_existing_index().await?;
            let stats = pipeline.stats().await?;

            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Summary => {
                    println!("State: {}", stats.state);
                    println!(
                        "Index ({}): {} vectors of dimension {} at {}",
                        stats.index.backend,
                        stats.index.total,
                        stats.index.dimension,
                        stats.index.location
                    );
                    println!(
                        "Embedding: {} via {} ({} dimensions)",
                        stats.embedding_model, stats.embedding_provider, stats.vector_dimension
                    );
                    match &stats.reranker {
                        Some(reranker) if stats.reranking_enabled => println!(
                            "Reranking: {} (pool {}, top {}, alpha {})",
                            reranker, stats.candidate_pool, stats.final_top_k, stats.alpha
                        ),
                        _ => println!("Reranking: disabled (top {})", stats.final_top_k),
                    }
                    println!(
                        "Chunking: size {}, overlap {}, field-specific {}",
                        stats.chunk_size, stats.chunk_overlap, stats.field_specific
                    );
                    println!("Generator: {}", stats.generator);
                }
            }
            Ok(())
        }
        Commands::Check => {
            let pipeline = RagPipeline::from_config(config).await?;
            let check = pipeline.check_components().await;

            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&check)?),
                OutputFormat::Summary => {
                    let mark = |ok: bool| if ok { "ok" } else { "FAILED" };
                    println!("Embedder:  {}", mark(check.embedder));
                    println!("Chunker:   {}", mark(check.chunker));
                    println!("Index:     {}", mark(check.index));
                    match check.reranker {
                        Some(ok) => println!("Reranker:  {}", mark(ok)),
                        None => println!("Reranker:  disabled"),
                    }
                    println!("Generator: {}", mark(check.generator));
                }
            }

            if !check.all_ok() {
                return Err(anyhow::anyhow!("one or more components failed"));
            }
            Ok(())
        }
        Commands::Reset => {
            config.generator.backend = GeneratorBackend::Extractive;
            let pipeline = RagPipeline::from_config(config).await?;
            pipeline.reset().await?;
            println!("Index reset");
            Ok(())
        }
    }
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))
}

fn read_documents(path: &Path) -> anyhow::Result<Vec<Document>> {
    let text = read_text(path)?;
    serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Invalid document array in {}: {}", path.display(), e))
}

fn print_response(response: &QueryResponse) {
    match response.status {
        QueryStatus::NotIndexed | QueryStatus::NoRelevantContext => {
            println!("{}", response.answer);
            return;
        }
        QueryStatus::Answered => {}
    }

    println!("{}", response.answer);
    if response.degraded {
        println!("(answer generation failed)");
    }

    let diagnostics = &response.diagnostics;
    println!(
        "\n{} passages via {} ({} requested, {} retrieved):",
        diagnostics.passages_returned,
        if diagnostics.reranking_used {
            "reranking"
        } else {
            "similarity"
        },
        diagnostics.candidates_requested,
        diagnostics.candidates_retrieved
    );
    for passage in &response.passages {
        let preview: String = passage.text.chars().take(100).collect();
        match passage.combined_score {
            Some(combined) => println!(
                "  {}. [combined {:.3}, rerank {:.3}, similarity {:.3}] {}",
                passage.rank + 1,
                combined,
                passage.reranker_score.unwrap_or_default(),
                passage.similarity,
                preview
            ),
            None => println!(
                "  {}. [similarity {:.3}] {}",
                passage.rank + 1,
                passage.similarity,
                preview
            ),
        }
    }
}
