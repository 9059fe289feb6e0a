use arbor::{ArborError, ModeId, OutputMethod, PreparedStylesheet, TransformConfig, handler_fn, load_config};
use std::env;
use std::sync::Arc;

fn usage(program: &str) -> ! {
    eprintln!("Runs the built-in template rules over an XML document.");
    eprintln!();
    eprintln!("Usage: {program} [--config <config.json>] [--copy] <input.xml> <output>");
    eprintln!();
    eprintln!("  --config  transformation settings (recovery policy, preview, whitespace)");
    eprintln!("  --copy    copy the document instead of extracting its text");
    std::process::exit(1);
}

/// A stylesheet with no rules of its own, or a single rule copying the whole
/// document when `copy` is set.
fn build_stylesheet(config: &TransformConfig, copy: bool) -> Result<PreparedStylesheet, ArborError> {
    let mut stylesheet = PreparedStylesheet::new(Arc::new(arbor::NamePool::new()));
    if copy {
        stylesheet.add_template(
            "/",
            Arc::new(handler_fn(|ctx, c| {
                ctx.current_node().copy_to(c.outputter()?)?;
                Ok(())
            })),
            ModeId::Default,
            0,
            None,
        )?;
    }
    stylesheet.configure_preview(config)?;
    Ok(stylesheet)
}

fn main() -> Result<(), ArborError> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("arbor");
    let mut config = TransformConfig::default();
    let mut copy = false;
    let mut paths = Vec::new();
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--config" => match rest.next() {
                Some(path) => {
                    log::info!("Loading configuration from {path}");
                    config = load_config(path)?;
                }
                None => usage(program),
            },
            "--copy" => copy = true,
            "-h" | "--help" => usage(program),
            _ => paths.push(arg.as_str()),
        }
    }
    let [input, output] = paths[..] else {
        usage(program);
    };

    let stylesheet = build_stylesheet(&config, copy)?;
    let method = if copy { OutputMethod::Xml } else { OutputMethod::Text };
    log::info!("Transforming {input} to {output}");
    arbor::transform_file(&stylesheet, input, output, method, &config)?;
    log::info!("Successfully wrote {output}");
    Ok(())
}
