//! Built-in tools: view, edit, npmInstall, deploy, shell.

use std::sync::PoisonError;

use shipwright_types::{
    DeployArgs, EditArgs, FileEntry, NpmInstallArgs, ShellArgs, ToolInvocation, ToolName,
    ViewArgs, normalize_path,
};

use crate::{ProcessOutput, ToolCtx, ToolError, ToolExecutor, ToolFut};

pub struct ViewTool;
pub struct EditTool;
pub struct NpmInstallTool;
pub struct DeployTool;
pub struct ShellTool;

#[must_use]
pub fn all() -> Vec<Box<dyn ToolExecutor>> {
    vec![
        Box::new(ViewTool),
        Box::new(EditTool),
        Box::new(NpmInstallTool),
        Box::new(DeployTool),
        Box::new(ShellTool),
    ]
}

fn mismatch(expected: ToolName, got: &ToolInvocation) -> ToolError {
    ToolError::BadArgs {
        message: format!("{expected} cannot run a {} invocation", got.name()),
    }
}

fn format_with_line_numbers(content: &str, start_line: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let max_line_num = start_line + lines.len() - 1;
    let width = max_line_num.to_string().len();
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let line_num = start_line + i;
        out.push_str(&format!("{line_num:>width$}| {line}\n"));
    }
    if !content.ends_with('\n') && out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Select a 1-indexed inclusive line range; an end of -1 reads to the end.
fn select_range(content: &str, range: [i64; 2]) -> Result<(String, usize), ToolError> {
    let [start, end] = range;
    if start < 1 {
        return Err(ToolError::BadArgs {
            message: "viewRange start must be >= 1".to_string(),
        });
    }
    if end != -1 && end < start {
        return Err(ToolError::BadArgs {
            message: "viewRange end must be >= start or -1".to_string(),
        });
    }
    let start = start as usize;
    let selected: Vec<&str> = content
        .lines()
        .skip(start - 1)
        .take(if end == -1 {
            usize::MAX
        } else {
            (end as usize) - start + 1
        })
        .collect();
    Ok((selected.join("\n"), start))
}

async fn run(
    ctx: &ToolCtx,
    tool: ToolName,
    program: &str,
    args: &[String],
) -> Result<ProcessOutput, ToolError> {
    let output = ctx.host.spawn_process(program, args).await?.wait().await?;
    if output.success() {
        Ok(output)
    } else {
        Err(ToolError::ExecutionFailed {
            tool,
            message: format!("exit code {}\n{}", output.exit_code, output.output.trim_end()),
        })
    }
}

impl ViewTool {
    async fn view(ctx: &ToolCtx, args: &ViewArgs) -> Result<String, ToolError> {
        let path = normalize_path(&args.path);
        let listing = {
            let files = ctx.files.read().unwrap_or_else(PoisonError::into_inner);
            match files.get(&path) {
                Some(FileEntry::Directory) => Some(
                    files
                        .children(&path)
                        .into_iter()
                        .map(|child| match files.get(child) {
                            Some(FileEntry::Directory) => format!("{child}/"),
                            _ => child.to_string(),
                        })
                        .collect::<Vec<_>>(),
                ),
                _ if path == "/" => Some(
                    files
                        .children("/")
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                ),
                _ => None,
            }
        };
        if let Some(entries) = listing {
            if args.view_range.is_some() {
                return Err(ToolError::BadArgs {
                    message: "viewRange is only valid for files".to_string(),
                });
            }
            return Ok(format!("Directory {path}:\n{}", entries.join("\n")));
        }

        let content = ctx.host.read_file(&path).await?;
        match args.view_range {
            None => Ok(format_with_line_numbers(&content, 1)),
            Some(range) => {
                let (selected, start) = select_range(&content, range)?;
                Ok(format_with_line_numbers(&selected, start))
            }
        }
    }
}

impl ToolExecutor for ViewTool {
    fn name(&self) -> ToolName {
        ToolName::View
    }

    fn execute<'a>(&'a self, invocation: &'a ToolInvocation, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let ToolInvocation::View(args) = invocation else {
                return Err(mismatch(ToolName::View, invocation));
            };
            Self::view(ctx, args).await
        })
    }
}

impl EditTool {
    async fn edit(ctx: &ToolCtx, args: &EditArgs) -> Result<String, ToolError> {
        let path = normalize_path(&args.path);
        let content = ctx.host.read_file(&path).await?;
        let occurrences = content.matches(args.old.as_str()).count();
        match occurrences {
            0 => {
                return Err(ToolError::ExecutionFailed {
                    tool: ToolName::Edit,
                    message: format!("`old` was not found in {path}"),
                });
            }
            1 => {}
            n => {
                return Err(ToolError::ExecutionFailed {
                    tool: ToolName::Edit,
                    message: format!(
                        "`old` appears {n} times in {path}; it must match exactly once"
                    ),
                });
            }
        }

        let updated = content.replacen(args.old.as_str(), &args.new, 1);
        ctx.host.write_file(&path, &updated).await?;
        ctx.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .write_file(&path, updated);
        Ok(format!("Edited {path}"))
    }
}

impl ToolExecutor for EditTool {
    fn name(&self) -> ToolName {
        ToolName::Edit
    }

    fn execute<'a>(&'a self, invocation: &'a ToolInvocation, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let ToolInvocation::Edit(args) = invocation else {
                return Err(mismatch(ToolName::Edit, invocation));
            };
            Self::edit(ctx, args).await
        })
    }
}

impl NpmInstallTool {
    async fn install(ctx: &ToolCtx, args: &NpmInstallArgs) -> Result<String, ToolError> {
        let mut npm_args = vec!["install".to_string()];
        npm_args.extend(args.package_list().map(str::to_string));
        if npm_args.len() == 1 {
            return Err(ToolError::BadArgs {
                message: "packages must name at least one package".to_string(),
            });
        }
        let output = run(ctx, ToolName::NpmInstall, "npm", &npm_args).await?;
        Ok(format!(
            "Installed {}\n{}",
            args.packages.trim(),
            output.output.trim_end()
        )
        .trim_end()
        .to_string())
    }
}

impl ToolExecutor for NpmInstallTool {
    fn name(&self) -> ToolName {
        ToolName::NpmInstall
    }

    fn execute<'a>(&'a self, invocation: &'a ToolInvocation, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let ToolInvocation::NpmInstall(args) = invocation else {
                return Err(mismatch(ToolName::NpmInstall, invocation));
            };
            Self::install(ctx, args).await
        })
    }
}

impl DeployTool {
    async fn deploy(ctx: &ToolCtx, _args: &DeployArgs) -> Result<String, ToolError> {
        let Some((program, args)) = ctx.deploy_command.split_first() else {
            return Err(ToolError::ExecutionFailed {
                tool: ToolName::Deploy,
                message: "no deploy command configured".to_string(),
            });
        };
        let output = run(ctx, ToolName::Deploy, program, args).await?;
        Ok(format!("Deployed successfully.\n{}", output.output.trim_end())
            .trim_end()
            .to_string())
    }
}

impl ToolExecutor for DeployTool {
    fn name(&self) -> ToolName {
        ToolName::Deploy
    }

    fn execute<'a>(&'a self, invocation: &'a ToolInvocation, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let ToolInvocation::Deploy(args) = invocation else {
                return Err(mismatch(ToolName::Deploy, invocation));
            };
            Self::deploy(ctx, args).await
        })
    }
}

impl ShellTool {
    async fn shell(ctx: &ToolCtx, args: &ShellArgs) -> Result<String, ToolError> {
        if args.command.trim().is_empty() {
            return Err(ToolError::BadArgs {
                message: "command must not be empty".to_string(),
            });
        }
        let sh_args = vec!["-c".to_string(), args.command.clone()];
        let output = run(ctx, ToolName::Shell, "sh", &sh_args).await?;
        Ok(output.output)
    }
}

impl ToolExecutor for ShellTool {
    fn name(&self) -> ToolName {
        ToolName::Shell
    }

    fn execute<'a>(&'a self, invocation: &'a ToolInvocation, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let ToolInvocation::Shell(args) = invocation else {
                return Err(mismatch(ToolName::Shell, invocation));
            };
            Self::shell(ctx, args).await
        })
    }
}
