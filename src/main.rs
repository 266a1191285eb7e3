//! Run an image pipeline over a file, as a host would over a response body.
//!
//! ```bash
//! imgstream photo.png -o out.jpg --uri '/thumbs/photo.png?w=320' --header 'DPR: 2'
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;

use imgstream::codec::RasterCodec;
use imgstream::config::Config;
use imgstream::logging::init_tracing;
use imgstream::options::RequestContext;
use imgstream::pipeline::Pipeline;
use imgstream::sequence::SequenceElement;

/// Transform an image the way the configured location would serve it
#[derive(Parser, Debug)]
#[command(name = "imgstream", version)]
#[command(about = "Buffer, decode, transform and re-encode an image", long_about = None)]
struct Cli {
    /// Source image
    input: PathBuf,

    /// Where to write the transformed image
    #[arg(short, long)]
    output: PathBuf,

    /// Config file (defaults to the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request URI used for location matching and expressions
    #[arg(long, default_value = "/")]
    uri: String,

    /// Request header, as 'Name: value'
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Request variable for %{env:NAME}, as 'name=value'
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Feed the input in chunks of this many bytes
    #[arg(long, default_value_t = 64 * 1024)]
    chunk_size: usize,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: value', got '{raw}'"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected 'name=value', got '{raw}'"))?;
    Ok((name.to_string(), value.to_string()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.chunk_size == 0 {
        bail!("--chunk-size must be greater than zero");
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    let mut ctx = RequestContext::new(cli.uri.clone());
    for (name, value) in cli.headers {
        ctx = ctx.with_header(name, value);
    }
    for (name, value) in cli.vars {
        ctx = ctx.with_var(name, value);
    }

    let pipeline_config = config
        .resolve_for(ctx.path())
        .compile()
        .context("Failed to compile pipeline for request path")?;

    let source = Bytes::from(
        fs::read(&cli.input).with_context(|| format!("Failed to read {}", cli.input.display()))?,
    );

    let codec = Arc::new(RasterCodec::initialize());
    let mut pipeline = Pipeline::new(&pipeline_config, codec, ctx);

    let mut offset = 0;
    while offset < source.len() {
        let end = (offset + cli.chunk_size).min(source.len());
        pipeline.push(SequenceElement::Data(source.slice(offset..end)))?;
        offset = end;
    }
    pipeline.push(SequenceElement::End)?;

    let mut body = Vec::new();
    for element in pipeline.drain() {
        match element {
            SequenceElement::Data(bytes) => body.extend_from_slice(&bytes),
            SequenceElement::Artifact(artifact) => body.extend_from_slice(&artifact.read()?),
            SequenceElement::Flush | SequenceElement::Metadata(_) | SequenceElement::End => {}
        }
    }

    fs::write(&cli.output, &body)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    match pipeline.content_type() {
        Some(mime) => println!("{mime}"),
        None => println!("(content type unchanged)"),
    }
    Ok(())
}
