use clap::Parser;
use lexis_context::{Chunk, ChunkStats, Chunker, ChunkingConfig, Document};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};

/// A CLI tool to chunk plain text or knowledge-base records into JSON output using lexis-context.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Treat the input as a JSON array of records and chunk them field by field.
    #[arg(short, long)]
    documents: bool,

    /// Entity name for field-aware chunking of plain text (requires --field).
    #[arg(short, long)]
    entity: Option<String>,

    /// Field name for field-aware chunking of plain text (requires --entity).
    #[arg(short, long)]
    field: Option<String>,

    /// Default chunk size in characters.
    #[arg(short = 's', long, default_value_t = 200)]
    chunk_size: usize,

    /// Default chunk overlap in characters.
    #[arg(short = 'o', long, default_value_t = 50)]
    chunk_overlap: usize,

    /// Ignore the per-field policy table and use the default size for every field.
    #[arg(long)]
    no_field_policies: bool,

    /// Comma-separated list of fields to chunk, in order. Defaults to the built-in field list.
    #[arg(long, value_delimiter = ',')]
    fields: Option<Vec<String>>,

    /// Print length statistics instead of the chunks.
    #[arg(long)]
    stats: bool,
}

#[derive(Serialize)]
struct SerializableChunk<'a> {
    entity: Option<&'a str>,
    field: Option<&'a str>,
    sequence: usize,
    chars: usize,
    text: &'a str,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let content = if let Some(input_path) = &args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let mut config = ChunkingConfig::default()
        .with_chunk_size(args.chunk_size, args.chunk_overlap)
        .with_field_specific(!args.no_field_policies);
    if let Some(fields) = args.fields {
        config = config.with_fields(fields);
    }
    let chunker = Chunker::new(config)?;

    let chunks: Vec<Chunk> = if args.documents {
        let documents: Vec<Document> = serde_json::from_str(&content)?;
        chunker.chunk_documents(&documents)?
    } else if args.entity.is_some() || args.field.is_some() {
        chunker.chunk_field(&content, args.entity.as_deref(), args.field.as_deref())?
    } else {
        chunker.chunk_text(&content)
    };

    if args.stats {
        match ChunkStats::from_chunks(&chunks) {
            Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
            None => println!("No chunks produced"),
        }
        return Ok(());
    }

    let serializable_chunks: Vec<SerializableChunk> = chunks
        .iter()
        .map(|c| SerializableChunk {
            entity: c.entity.as_deref(),
            field: c.field.as_deref(),
            sequence: c.sequence,
            chars: c.text.chars().count(),
            text: &c.text,
        })
        .collect();

    let json_output = serde_json::to_string_pretty(&serializable_chunks)?;
    println!("{}", json_output);

    Ok(())
}
