use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::SESSION_ENV;
use crate::model::{Executor, GoalOrder, PlanOrder, Status, StepOrder, Window};
use crate::search::{SearchField, SearchMode};

#[derive(Parser, Debug)]
#[command(
    name = "planloop",
    version,
    about = "Track plans, steps and goals for an agent session"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Workspace directory holding the .planloop store"
    )]
    pub cwd: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "ID",
        env = SESSION_ENV,
        help = "Session identifier"
    )]
    pub session_id: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(subcommand)]
    Plan(PlanCommand),
    #[command(subcommand)]
    Step(StepCommand),
    #[command(subcommand)]
    Goal(GoalCommand),
    #[command(subcommand)]
    Hook(HookCommand),
}

#[derive(Subcommand, Debug)]
pub enum PlanCommand {
    Add(PlanAdd),
    #[command(name = "add-tree")]
    AddTree(PlanAddTree),
    List(PlanList),
    Search(PlanSearch),
    Show(IdArg),
    #[command(name = "show-active")]
    ShowActive,
    Export(PlanExport),
    Comment(CommentPairs),
    Update(PlanUpdate),
    Done(PlanDone),
    Remove(IdArg),
    Activate(PlanActivate),
    Deactivate,
}

#[derive(Subcommand, Debug)]
pub enum StepCommand {
    Add(StepAdd),
    #[command(name = "add-tree")]
    AddTree(StepAddTree),
    List(StepList),
    Show(IdArg),
    #[command(name = "show-next")]
    ShowNext,
    Comment(CommentPairs),
    Update(StepUpdate),
    Done(StepDone),
    Move(StepMove),
    Remove(IdsArg),
}

#[derive(Subcommand, Debug)]
pub enum GoalCommand {
    Add(GoalAdd),
    List(GoalList),
    Show(IdArg),
    Comment(CommentPairs),
    Update(GoalUpdate),
    Done(IdsArg),
    Remove(IdsArg),
}

#[derive(Subcommand, Debug)]
pub enum HookCommand {
    #[command(name = "pretooluse")]
    PreToolUse,
    Stop,
}

#[derive(Args, Debug)]
pub struct IdArg {
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct IdsArg {
    #[arg(value_name = "ID", num_args = 1..)]
    pub ids: Vec<i64>,
}

#[derive(Args, Debug)]
pub struct CommentPairs {
    #[arg(value_name = "ID COMMENT", num_args = 2..)]
    pub pairs: Vec<String>,
}

/// Status filter and paging shared by every `list`.
#[derive(Args, Debug)]
pub struct ListWindow {
    #[arg(long, conflicts_with = "status", help = "Include done entries")]
    pub all: bool,
    #[arg(long, value_enum)]
    pub status: Option<Status>,
    #[arg(long)]
    pub limit: Option<u64>,
    #[arg(long)]
    pub offset: Option<u64>,
    #[arg(long)]
    pub desc: bool,
    #[arg(long, help = "Print only the number of matching entries")]
    pub count: bool,
}

impl ListWindow {
    /// Only todo entries unless `--all` or `--status` says otherwise.
    pub fn window(&self) -> Window {
        let status = if self.all {
            None
        } else {
            Some(self.status.unwrap_or(Status::Todo))
        };
        Window {
            status,
            limit: self.limit,
            offset: self.offset,
            descending: self.desc,
        }
    }
}

#[derive(Args, Debug)]
pub struct PlanAdd {
    pub title: String,
    pub content: String,
}

#[derive(Args, Debug)]
pub struct PlanAddTree {
    pub title: String,
    pub content: String,
    #[arg(
        value_name = "ARGS",
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "Repeat --step <content> [--executor ai|human] [--goal <goal>]... per step"
    )]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct PlanList {
    #[command(flatten)]
    pub window: ListWindow,
    #[arg(long, value_enum, default_value_t)]
    pub order: PlanOrder,
}

#[derive(Args, Debug)]
pub struct PlanSearch {
    #[arg(long, conflicts_with = "status", help = "Include done plans")]
    pub all: bool,
    #[arg(long, value_enum)]
    pub status: Option<Status>,
    #[arg(long, value_name = "TERM", required = true)]
    pub search: Vec<String>,
    #[arg(long, value_enum, default_value_t)]
    pub mode: SearchMode,
    #[arg(long, value_enum, default_value_t)]
    pub field: SearchField,
    #[arg(long)]
    pub match_case: bool,
}

#[derive(Args, Debug)]
pub struct PlanExport {
    pub id: i64,
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct PlanUpdate {
    pub id: i64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub content: Option<String>,
    #[arg(long, value_enum)]
    pub status: Option<Status>,
    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(Args, Debug)]
pub struct PlanDone {
    pub id: i64,
    #[arg(long, help = "Mark every step and goal of the plan done as well")]
    pub all_steps: bool,
}

#[derive(Args, Debug)]
pub struct PlanActivate {
    pub id: i64,
    #[arg(long, help = "Take over a plan already active in another session")]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct StepAdd {
    pub plan_id: i64,
    #[arg(value_name = "CONTENT", num_args = 1..)]
    pub contents: Vec<String>,
    #[arg(long, help = "1-based position to insert at")]
    pub at: Option<usize>,
    #[arg(long, value_enum, default_value = "ai")]
    pub executor: Executor,
}

#[derive(Args, Debug)]
pub struct StepAddTree {
    pub plan_id: i64,
    pub content: String,
    #[arg(long, value_enum, default_value = "ai")]
    pub executor: Executor,
    #[arg(long = "goal", value_name = "GOAL")]
    pub goals: Vec<String>,
}

#[derive(Args, Debug)]
pub struct StepList {
    pub plan_id: i64,
    #[command(flatten)]
    pub window: ListWindow,
    #[arg(long, value_enum)]
    pub executor: Option<Executor>,
    #[arg(long, value_enum, default_value_t)]
    pub order: StepOrder,
}

#[derive(Args, Debug)]
pub struct StepUpdate {
    pub id: i64,
    #[arg(long)]
    pub content: Option<String>,
    #[arg(long, value_enum)]
    pub status: Option<Status>,
    #[arg(long, value_enum)]
    pub executor: Option<Executor>,
    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(Args, Debug)]
pub struct StepDone {
    pub id: i64,
    #[arg(long, help = "Mark every goal of the step done first")]
    pub all_goals: bool,
}

#[derive(Args, Debug)]
pub struct StepMove {
    pub id: i64,
    #[arg(long)]
    pub to: usize,
}

#[derive(Args, Debug)]
pub struct GoalAdd {
    pub step_id: i64,
    #[arg(value_name = "CONTENT", num_args = 1..)]
    pub contents: Vec<String>,
}

#[derive(Args, Debug)]
pub struct GoalList {
    pub step_id: i64,
    #[command(flatten)]
    pub window: ListWindow,
    #[arg(long, value_enum, default_value_t)]
    pub order: GoalOrder,
}

#[derive(Args, Debug)]
pub struct GoalUpdate {
    pub id: i64,
    #[arg(long)]
    pub content: Option<String>,
    #[arg(long, value_enum)]
    pub status: Option<Status>,
    #[arg(long)]
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_defaults_to_todo() {
        let cli = Cli::try_parse_from(["planloop", "plan", "list"]).unwrap();
        let Command::Plan(PlanCommand::List(args)) = cli.command else {
            panic!("expected plan list");
        };
        assert_eq!(args.window.window().status, Some(Status::Todo));
        assert_eq!(args.order, PlanOrder::Updated);

        let cli = Cli::try_parse_from(["planloop", "step", "list", "3", "--all", "--desc"]).unwrap();
        let Command::Step(StepCommand::List(args)) = cli.command else {
            panic!("expected step list");
        };
        let window = args.window.window();
        assert_eq!(window.status, None);
        assert!(window.descending);
        assert_eq!(args.order, StepOrder::Position);
    }

    #[test]
    fn all_and_status_conflict() {
        let parsed = Cli::try_parse_from(["planloop", "goal", "list", "1", "--all", "--status", "done"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn add_tree_keeps_trailing_flags() {
        let cli = Cli::try_parse_from([
            "planloop", "plan", "add-tree", "T", "C", "--step", "one", "--goal", "g",
        ])
        .unwrap();
        let Command::Plan(PlanCommand::AddTree(args)) = cli.command else {
            panic!("expected add-tree");
        };
        assert_eq!(args.args, ["--step", "one", "--goal", "g"]);
    }
}
