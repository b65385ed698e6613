use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use document::{diff, remap, DiffResult, TextPosition};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use versioning::{
    VersionEntry, VersionFilter, VersionId, VersionOptions, VersionStore, VersionStoreConfig,
};

#[derive(Parser)]
#[command(name = "resume-cli")]
#[command(about = "Resume history CLI - diff, version and merge documents from the shell")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Version history file
    #[arg(short, long, global = true, default_value = "versions.json")]
    store: PathBuf,

    /// Retention cap per branch when creating a new history
    #[arg(long, global = true, default_value = "50")]
    max_versions: usize,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two files
    Diff {
        before: PathBuf,
        after: PathBuf,

        /// Print the full diff as JSON
        #[arg(long)]
        json: bool,
    },

    /// Carry a character range from one file's content into another's
    Remap {
        before: PathBuf,
        after: PathBuf,

        #[arg(long)]
        start: usize,

        #[arg(long)]
        end: usize,
    },

    /// Record a file's content as a new version
    Save {
        file: PathBuf,

        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long, default_value = "cli")]
        author: String,

        /// Target branch (defaults to the current one)
        #[arg(short, long)]
        branch: Option<String>,

        #[arg(long)]
        milestone: bool,
    },

    /// List versions, newest first
    List {
        #[arg(short, long)]
        branch: Option<String>,

        #[arg(short, long)]
        author: Option<String>,

        #[arg(short, long)]
        tag: Option<String>,

        #[arg(long)]
        milestones: bool,

        #[arg(long)]
        no_auto_saves: bool,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print a version's content, or write it to a file
    Restore {
        id: VersionId,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Diff two stored versions
    Compare { from: VersionId, to: VersionId },

    /// Fork a branch from a version
    Branch {
        name: String,

        #[arg(short, long)]
        from: VersionId,

        #[arg(short, long, default_value = "cli")]
        author: String,

        /// Make it the current branch
        #[arg(long)]
        switch: bool,
    },

    /// Change the current branch
    Switch { name: String },

    /// List branches
    Branches,

    /// Merge one branch into another
    Merge {
        source: String,
        target: String,

        #[arg(short, long, default_value = "cli")]
        author: String,
    },

    /// Delete a version that is neither a head nor a milestone
    Delete { id: VersionId },

    /// Add or remove a tag
    Tag {
        id: VersionId,
        tag: String,

        #[arg(long)]
        remove: bool,
    },

    /// Mark or unmark a version as a milestone
    Milestone {
        id: VersionId,

        #[arg(long)]
        unset: bool,
    },

    /// Check stored checksums
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let config = VersionStoreConfig {
        max_versions: cli.max_versions,
        ..Default::default()
    };

    match cli.command {
        Commands::Diff {
            before,
            after,
            json,
        } => diff_command(before, after, json).await,
        Commands::Remap {
            before,
            after,
            start,
            end,
        } => remap_command(before, after, start, end).await,
        command => history_command(&cli.store, config, command).await,
    }
}

async fn diff_command(before: PathBuf, after: PathBuf, json: bool) -> Result<()> {
    let old = read(&before).await?;
    let new = read(&after).await?;
    let result = diff(&old, &new);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_diff(&result));
    }
    Ok(())
}

async fn remap_command(before: PathBuf, after: PathBuf, start: usize, end: usize) -> Result<()> {
    let old = read(&before).await?;
    let new = read(&after).await?;
    let position = TextPosition::in_content(&old, start, end)?;

    match remap(&position, &diff(&old, &new)) {
        Some(mapped) => {
            let p = mapped.position;
            println!(
                "{}..{} (line {}, column {}){}",
                p.start,
                p.end,
                p.line + 1,
                p.column + 1,
                if mapped.degraded { " degraded" } else { "" }
            );
        }
        None => println!("removed"),
    }
    Ok(())
}

/// Commands that load, possibly change, and save the history file
async fn history_command(path: &Path, config: VersionStoreConfig, command: Commands) -> Result<()> {
    let mut store = VersionStore::load_or_default(path, config)
        .await
        .with_context(|| format!("loading {:?}", path))?;
    debug!("Loaded {} versions from {:?}", store.len(), path);

    let changed = match command {
        Commands::Save {
            file,
            title,
            description,
            author,
            branch,
            milestone,
        } => {
            let content = read(&file).await?;
            let mut options = VersionOptions::new(author, title);
            options.description = description;
            options.branch = branch;
            options.is_milestone = milestone;
            let entry = store.create_version(&content, options)?;
            info!("Saved {} on {}", entry.id, entry.branch);
            println!("{}", entry.id);
            true
        }

        Commands::List {
            branch,
            author,
            tag,
            milestones,
            no_auto_saves,
            limit,
        } => {
            let filter = VersionFilter {
                branch,
                author,
                tag,
                milestones_only: milestones,
                include_auto_saves: !no_auto_saves,
                limit,
            };
            for entry in store.list_versions(&filter) {
                println!("{}", render_entry(entry));
            }
            false
        }

        Commands::Restore { id, output } => {
            let content = store.restore(id)?;
            match output {
                Some(file) => {
                    tokio::fs::write(&file, &content).await?;
                    info!("Wrote {} to {:?}", id, file);
                }
                None => print!("{}", content),
            }
            true
        }

        Commands::Compare { from, to } => {
            print!("{}", render_diff(&store.compare(from, to)?));
            false
        }

        Commands::Branch {
            name,
            from,
            author,
            switch,
        } => {
            let branch = store.create_branch(from, &name, author)?;
            info!("Created branch {} at {}", branch.name, branch.head_version_id);
            if switch {
                store.switch_branch(&name)?;
            }
            true
        }

        Commands::Switch { name } => {
            store.switch_branch(&name)?;
            info!("Switched to {}", name);
            true
        }

        Commands::Branches => {
            let current = store.current_branch().to_string();
            for branch in store.branches() {
                let marker = if branch.name == current { "*" } else { " " };
                println!("{} {} {}", marker, branch.name, branch.head_version_id);
            }
            false
        }

        Commands::Merge {
            source,
            target,
            author,
        } => {
            let result = store.merge_branch(&source, &target, &author)?;
            if !result.is_clean() {
                for conflict in &result.conflicts {
                    println!(
                        "conflict at lines {}..{}:\n  {}: {}\n  {}: {}",
                        conflict.base_lines.start + 1,
                        conflict.base_lines.end + 1,
                        target,
                        conflict.target_text.trim_end(),
                        source,
                        conflict.source_text.trim_end()
                    );
                }
                bail!("{} conflict(s); nothing merged", result.conflicts.len());
            }
            match result.merge_version_id {
                Some(id) => println!("{}", id),
                None => println!("{} is already up to date", target),
            }
            result.merge_version_id.is_some()
        }

        Commands::Delete { id } => {
            let removed = store.delete_version(id)?;
            info!("Deleted {} ({})", removed.id, removed.title);
            true
        }

        Commands::Tag { id, tag, remove } => {
            if remove {
                if !store.remove_tag(id, &tag)? {
                    warn!("{} was not tagged {}", id, tag);
                }
            } else {
                store.add_tag(id, &tag)?;
            }
            true
        }

        Commands::Milestone { id, unset } => {
            store.set_milestone(id, !unset)?;
            true
        }

        Commands::Verify => {
            let mut bad = 0;
            for entry in store.list_versions(&VersionFilter::default()) {
                if !entry.verify() {
                    println!("{} checksum mismatch", entry.id);
                    bad += 1;
                }
            }
            if bad > 0 {
                bail!("{} corrupt version(s)", bad);
            }
            println!("ok");
            false
        }

        Commands::Diff { .. } | Commands::Remap { .. } => false,
    };

    if changed {
        store.save_to(path).await?;
        debug!("Saved history to {:?}", path);
    }
    Ok(())
}

async fn read(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {:?}", path))
}

fn render_entry(entry: &VersionEntry) -> String {
    let mut flags = Vec::new();
    if entry.is_milestone {
        flags.push("milestone".to_string());
    }
    if entry.is_auto_save {
        flags.push("auto".to_string());
    }
    flags.extend(entry.tags.iter().map(|t| format!("#{}", t)));

    format!(
        "{:<5} {:<12} {} {:<12} {}{}",
        entry.id.to_string(),
        entry.branch,
        entry.timestamp.format("%Y-%m-%d %H:%M"),
        entry.author,
        entry.title,
        if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        }
    )
}

/// Unified-style rendering of the changed chunks
fn render_diff(result: &DiffResult) -> String {
    let mut out = String::new();
    for chunk in result.changes() {
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@ {:?}\n",
            chunk.old_lines.start + 1,
            chunk.old_lines.len(),
            chunk.new_lines.start + 1,
            chunk.new_lines.len(),
            chunk.kind
        ));
        for line in chunk.old_text.lines() {
            out.push_str(&format!("-{}\n", line));
        }
        for line in chunk.new_text.lines() {
            out.push_str(&format!("+{}\n", line));
        }
    }

    let s = &result.summary;
    out.push_str(&format!(
        "{} added, {} deleted, {} modified line(s); +{} -{} words\n",
        s.lines_added, s.lines_deleted, s.lines_modified, s.words_added, s.words_deleted
    ));
    out
}
