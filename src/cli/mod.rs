// src/cli/mod.rs

use clap::Parser;

pub mod dispatcher;
pub mod handlers;

const HELP_TEMPLATE: &str = "\
<title>dploy</title> {version}
{about}

<title>Usage:</title>
  <cmd>dploy</cmd> <hl><STAGE></hl> <hl><TASK></hl> [ARGS]...
  <cmd>dploy</cmd> --list

<title>Examples:</title>
  <cmd>dploy</cmd> prod deploy             <dim># full pipeline on every prod host</dim>
  <cmd>dploy</cmd> staging deploy --upgrade <dim># same, upgrading requirements</dim>
  <cmd>dploy</cmd> prod nginx-setup        <dim># a single step</dim>
  <cmd>dploy</cmd> prod django shell       <dim># any manage.py command</dim>
  <cmd>dploy</cmd> dev print-context

<title>Options:</title>
{options}

Run <cmd>dploy --list</cmd> for every available task.
";

/// Builds the colour-aware help string at runtime.
fn build_help_string() -> &'static str {
    let use_colors = colored::control::SHOULD_COLORIZE.should_colorize();

    let title = if use_colors { "\x1b[1;33m" } else { "" }; // Bold Yellow
    let hl = if use_colors { "\x1b[1;36m" } else { "" }; // Bold Cyan
    let cmd = if use_colors { "\x1b[36m" } else { "" }; // Cyan
    let dim = if use_colors { "\x1b[2m" } else { "" };
    let reset = if use_colors { "\x1b[0m" } else { "" };

    let formatted = HELP_TEMPLATE
        .replace("<title>", title)
        .replace("</title>", reset)
        .replace("<hl>", hl)
        .replace("</hl>", reset)
        .replace("<cmd>", cmd)
        .replace("</cmd>", reset)
        .replace("<dim>", dim)
        .replace("</dim>", reset);

    Box::leak(formatted.into_boxed_str())
}

/// dploy: stage-aware deployment of Django applications.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    help_template = { build_help_string() },
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Lists the available tasks and exits.
    #[arg(long, short)]
    pub list: bool,

    /// The stage to act on, as declared under `stages` in dploy.yml.
    pub stage: Option<String>,

    /// The task to run. Defaults to `select-stage`.
    pub task: Option<String>,

    /// Arguments passed through to the task.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
