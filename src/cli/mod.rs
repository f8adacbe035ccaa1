use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use clap::{Args, Subcommand};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use crate::{
    archive::group_by_month,
    engine::{Direction, DragEngine, DragRef, ViewScope},
    error::{ApiError, EngineError, ValidationError},
    gateway::Gateway,
    ordering::UNCATEGORIZED,
    polling::{PollEvent, spawn_board_poller},
    search::{parse_search_query, to_search_query},
    session::{BoardSession, DropSummary},
    settings::Settings,
    types::{
        BacklogCategory, Board, CreateBoardRequest, CreateCategoryRequest, CreateTaskRequest,
        Task, TaskStatus, UpdateBoardRequest, UpdateCategoryRequest, UpdateTaskRequest,
        normalize_tags,
    },
    validation::{validate_name, validate_title},
    views::{
        render_archive, render_backlog, render_board, render_board_list, render_category_list,
        render_task_detail, render_task_list, short_id,
    },
};

const SCHEMA_VERSION: &str = "cli.v1";

#[derive(Debug, Clone, Subcommand)]
pub enum RootCommand {
    Board {
        #[command(subcommand)]
        command: BoardCommand,
    },
    Backlog {
        #[command(subcommand)]
        command: ViewCommand,
    },
    Archive {
        #[command(subcommand)]
        command: ViewCommand,
    },
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    Category {
        #[command(subcommand)]
        command: CategoryCommand,
    },
    /// Search tasks; `Board:`, `Tag:` and `Status:` tokens filter the results.
    Search(SearchArgs),
    /// Keep the board on screen and redraw it when the server changes.
    Watch(WatchArgs),
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommand {
    Show,
    /// Write values to the settings file. Out-of-range numbers are clamped.
    Set(ConfigSetArgs),
}

#[derive(Debug, Clone, Subcommand)]
pub enum BoardCommand {
    List,
    Show,
    Create(BoardCreateArgs),
    Update(BoardUpdateArgs),
    Delete(BoardDeleteArgs),
}

#[derive(Debug, Clone, Subcommand)]
pub enum ViewCommand {
    Show,
}

#[derive(Debug, Clone, Subcommand)]
pub enum TaskCommand {
    List(TaskListArgs),
    Show(TaskShowArgs),
    Create(TaskCreateArgs),
    Update(TaskUpdateArgs),
    Delete(TaskDeleteArgs),
    Move(TaskMoveArgs),
}

#[derive(Debug, Clone, Subcommand)]
pub enum CategoryCommand {
    List,
    Create(CategoryCreateArgs),
    Rename(CategoryRenameArgs),
    Delete(CategoryDeleteArgs),
    Move(CategoryMoveArgs),
}

#[derive(Debug, Clone, Args)]
pub struct BoardCreateArgs {
    #[arg(long, value_name = "TEXT")]
    pub name: String,

    #[arg(long, value_name = "TEXT")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct BoardUpdateArgs {
    #[arg(long, value_name = "BOARD")]
    pub id: String,

    #[arg(long, value_name = "TEXT")]
    pub name: Option<String>,

    #[arg(long, value_name = "TEXT")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct BoardDeleteArgs {
    #[arg(long, value_name = "BOARD")]
    pub id: String,
}

#[derive(Debug, Clone, Args)]
pub struct TaskListArgs {
    #[arg(long, value_name = "STATUS")]
    pub status: Option<TaskStatus>,

    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    #[arg(long)]
    pub archived: bool,
}

#[derive(Debug, Clone, Args)]
pub struct TaskShowArgs {
    #[arg(long, value_name = "TASK_ID")]
    pub id: String,
}

#[derive(Debug, Clone, Args)]
pub struct TaskCreateArgs {
    #[arg(long, value_name = "TEXT")]
    pub title: String,

    #[arg(long, value_name = "TEXT")]
    pub description: Option<String>,

    /// Defaults to TODO, or BACKLOG when --category is given.
    #[arg(long, value_name = "STATUS")]
    pub status: Option<TaskStatus>,

    #[arg(long, value_name = "CATEGORY")]
    pub category: Option<String>,

    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct TaskUpdateArgs {
    #[arg(long, value_name = "TASK_ID")]
    pub id: String,

    #[arg(long, value_name = "TEXT")]
    pub title: Option<String>,

    #[arg(long, value_name = "TEXT")]
    pub description: Option<String>,

    /// Replaces the task's tags.
    #[arg(long = "tag", value_name = "TAG", conflicts_with = "clear_tags")]
    pub tags: Vec<String>,

    #[arg(long)]
    pub clear_tags: bool,
}

#[derive(Debug, Clone, Args)]
pub struct TaskDeleteArgs {
    #[arg(long, value_name = "TASK_ID")]
    pub id: String,
}

/// `--to-status` picks the view from the new status and `--to-category`
/// works on the backlog view; `--onto` and the nudges use `--view`.
#[derive(Debug, Clone, Args)]
pub struct TaskMoveArgs {
    #[arg(long, value_name = "TASK_ID")]
    pub id: String,

    #[arg(long, value_name = "VIEW", default_value = "board")]
    pub view: ViewScope,

    #[command(flatten)]
    pub target: MoveTargetArgs,
}

#[derive(Debug, Clone, Default, Args)]
#[group(id = "move_target", required = true, multiple = false)]
pub struct MoveTargetArgs {
    /// Drop onto this task: the moved task takes its index, so a move down
    /// lands after it and a move up lands before it.
    #[arg(long, value_name = "TASK_ID", group = "move_target")]
    pub onto: Option<String>,

    #[arg(long, value_name = "STATUS", group = "move_target")]
    pub to_status: Option<TaskStatus>,

    /// Category name or id, or `uncategorized`.
    #[arg(long, value_name = "CATEGORY", group = "move_target")]
    pub to_category: Option<String>,

    #[arg(long, group = "move_target")]
    pub up: bool,

    #[arg(long, group = "move_target")]
    pub down: bool,

    #[arg(long, group = "move_target")]
    pub left: bool,

    #[arg(long, group = "move_target")]
    pub right: bool,
}

impl MoveTargetArgs {
    fn direction(&self) -> Option<Direction> {
        [
            (self.up, Direction::Up),
            (self.down, Direction::Down),
            (self.left, Direction::Left),
            (self.right, Direction::Right),
        ]
        .into_iter()
        .find_map(|(set, direction)| set.then_some(direction))
    }
}

#[derive(Debug, Clone, Args)]
pub struct CategoryCreateArgs {
    #[arg(long, value_name = "TEXT")]
    pub name: String,
}

#[derive(Debug, Clone, Args)]
pub struct CategoryRenameArgs {
    #[arg(long, value_name = "CATEGORY")]
    pub id: String,

    #[arg(long, value_name = "TEXT")]
    pub name: String,
}

#[derive(Debug, Clone, Args)]
pub struct CategoryDeleteArgs {
    #[arg(long, value_name = "CATEGORY")]
    pub id: String,
}

#[derive(Debug, Clone, Args)]
pub struct CategoryMoveArgs {
    #[arg(long, value_name = "CATEGORY")]
    pub id: String,

    /// The moved category takes this category's place.
    #[arg(long, value_name = "CATEGORY")]
    pub onto: String,
}

#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    #[arg(value_name = "QUERY", num_args = 1.., required = true)]
    pub query: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    #[arg(long, value_name = "VIEW", default_value = "board")]
    pub view: ViewScope,

    /// Overrides `poll_interval_ms` from the settings file, within the same
    /// bounds.
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Stop after this many redraws instead of waiting for Ctrl-C.
    #[arg(long, value_name = "N")]
    pub max_refreshes: Option<usize>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ConfigSetArgs {
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    #[arg(long, value_name = "BOARD", conflicts_with = "clear_default_board")]
    pub default_board: Option<String>,

    #[arg(long)]
    pub clear_default_board: bool,

    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    #[arg(long, value_name = "MS")]
    pub request_timeout_ms: Option<u64>,
}

/// Everything a command needs besides its own arguments.
pub struct Invocation {
    pub gateway: Arc<dyn Gateway>,
    pub settings: Settings,
    /// Settings file written by `config set`.
    pub config_path: Option<PathBuf>,
    pub board: Option<String>,
    pub json_output: bool,
    pub quiet: bool,
}

pub async fn run(invocation: Invocation, command: RootCommand) -> i32 {
    match execute(&invocation, command).await {
        Ok(output) => {
            print_success(output, invocation.json_output, invocation.quiet);
            0
        }
        Err(err) => {
            print_error(&err, invocation.json_output);
            err.exit_code
        }
    }
}

/// Reports a failure that happened before any command could run.
pub fn report_startup_error(err: &anyhow::Error, json_output: bool) -> i32 {
    let err = CliError {
        exit_code: 5,
        code: "STARTUP_FAILED",
        message: format_anyhow_error_chain(err),
        details: None,
    };
    print_error(&err, json_output);
    err.exit_code
}

#[derive(Debug)]
struct CommandOutput {
    command: &'static str,
    board: Option<String>,
    data: Value,
    text: String,
}

#[derive(Debug)]
struct CliError {
    exit_code: i32,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

type CliResult<T> = Result<T, CliError>;

async fn execute(inv: &Invocation, command: RootCommand) -> CliResult<CommandOutput> {
    match command {
        RootCommand::Board { command } => execute_board_command(inv, command).await,
        RootCommand::Backlog {
            command: ViewCommand::Show,
        } => backlog_show(inv).await,
        RootCommand::Archive {
            command: ViewCommand::Show,
        } => archive_show(inv).await,
        RootCommand::Task { command } => execute_task_command(inv, command).await,
        RootCommand::Category { command } => execute_category_command(inv, command).await,
        RootCommand::Search(args) => search(inv, args).await,
        RootCommand::Watch(args) => watch(inv, args).await,
        RootCommand::Config {
            command: ConfigCommand::Show,
        } => Ok(config_show(inv)),
        RootCommand::Config {
            command: ConfigCommand::Set(args),
        } => config_set(inv, args),
    }
}

async fn execute_board_command(inv: &Invocation, command: BoardCommand) -> CliResult<CommandOutput> {
    match command {
        BoardCommand::List => board_list(inv).await,
        BoardCommand::Show => board_show(inv).await,
        BoardCommand::Create(args) => board_create(inv, args).await,
        BoardCommand::Update(args) => board_update(inv, args).await,
        BoardCommand::Delete(args) => board_delete(inv, args).await,
    }
}

async fn execute_task_command(inv: &Invocation, command: TaskCommand) -> CliResult<CommandOutput> {
    match command {
        TaskCommand::List(args) => task_list(inv, args).await,
        TaskCommand::Show(args) => task_show(inv, args).await,
        TaskCommand::Create(args) => task_create(inv, args).await,
        TaskCommand::Update(args) => task_update(inv, args).await,
        TaskCommand::Delete(args) => task_delete(inv, args).await,
        TaskCommand::Move(args) => task_move(inv, args).await,
    }
}

async fn execute_category_command(
    inv: &Invocation,
    command: CategoryCommand,
) -> CliResult<CommandOutput> {
    match command {
        CategoryCommand::List => category_list(inv).await,
        CategoryCommand::Create(args) => category_create(inv, args).await,
        CategoryCommand::Rename(args) => category_rename(inv, args).await,
        CategoryCommand::Delete(args) => category_delete(inv, args).await,
        CategoryCommand::Move(args) => category_move(inv, args).await,
    }
}

async fn board_list(inv: &Invocation) -> CliResult<CommandOutput> {
    let boards = inv.gateway.list_boards().await.map_err(api_error)?;
    Ok(CommandOutput {
        command: "board.list",
        board: None,
        data: json!({ "boards": boards }),
        text: render_board_list(&boards),
    })
}

async fn board_show(inv: &Invocation) -> CliResult<CommandOutput> {
    let session = open_session(inv).await?;
    Ok(view_output("board.show", &session, ViewScope::Board))
}

async fn backlog_show(inv: &Invocation) -> CliResult<CommandOutput> {
    let session = open_session(inv).await?;
    Ok(view_output("backlog.show", &session, ViewScope::Backlog))
}

async fn archive_show(inv: &Invocation) -> CliResult<CommandOutput> {
    let session = open_session(inv).await?;
    let months = group_by_month(session.archived_tasks());
    Ok(CommandOutput {
        command: "archive.show",
        board: Some(session.board().name.clone()),
        data: json!({ "months": months }),
        text: render_archive(&months),
    })
}

async fn board_create(inv: &Invocation, args: BoardCreateArgs) -> CliResult<CommandOutput> {
    let request = CreateBoardRequest {
        name: validate_name("name", &args.name).map_err(validation_error)?,
        description: non_blank(args.description),
    };
    let board = inv
        .gateway
        .create_board(&request)
        .await
        .map_err(api_error)?;
    info!(board_id = %board.id, "board created");
    Ok(CommandOutput {
        command: "board.create",
        board: Some(board.name.clone()),
        text: format!("created board {} ({})", board.name, short_id(&board.id)),
        data: json!({ "board": board }),
    })
}

async fn board_update(inv: &Invocation, args: BoardUpdateArgs) -> CliResult<CommandOutput> {
    let boards = inv.gateway.list_boards().await.map_err(api_error)?;
    let board = resolve_board_selector(&boards, &args.id)?;

    let request = UpdateBoardRequest {
        name: args
            .name
            .as_deref()
            .map(|name| validate_name("name", name))
            .transpose()
            .map_err(validation_error)?,
        description: args.description,
    };
    if request == UpdateBoardRequest::default() {
        return Err(usage_error(
            "NOTHING_TO_UPDATE",
            "provide --name or --description",
        ));
    }

    let updated = inv
        .gateway
        .update_board(&board.id, &request)
        .await
        .map_err(api_error)?;
    Ok(CommandOutput {
        command: "board.update",
        board: Some(updated.name.clone()),
        text: format!("updated board {}", updated.name),
        data: json!({ "board": updated }),
    })
}

async fn board_delete(inv: &Invocation, args: BoardDeleteArgs) -> CliResult<CommandOutput> {
    let boards = inv.gateway.list_boards().await.map_err(api_error)?;
    let board = resolve_board_selector(&boards, &args.id)?;
    inv.gateway
        .delete_board(&board.id)
        .await
        .map_err(api_error)?;
    info!(board_id = %board.id, "board deleted");
    Ok(CommandOutput {
        command: "board.delete",
        board: Some(board.name.clone()),
        text: format!("deleted board {}", board.name),
        data: json!({ "deleted": board.id }),
    })
}

async fn task_list(inv: &Invocation, args: TaskListArgs) -> CliResult<CommandOutput> {
    let session = open_session(inv).await?;
    let source = if args.archived {
        session.archived_tasks()
    } else {
        session.active_tasks()
    };
    let wanted_tags = normalize_tags(&args.tags);

    let mut tasks: Vec<Task> = source
        .iter()
        .filter(|task| args.status.is_none_or(|status| task.status == status))
        .filter(|task| {
            wanted_tags.iter().all(|wanted| {
                task.tags
                    .iter()
                    .any(|tag| tag.to_lowercase() == wanted.to_lowercase())
            })
        })
        .cloned()
        .collect();
    tasks.sort_by(|a, b| {
        a.status
            .cmp(&b.status)
            .then_with(|| a.position.cmp(&b.position))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });

    Ok(CommandOutput {
        command: "task.list",
        board: Some(session.board().name.clone()),
        text: render_task_list(&tasks, &HashMap::new()),
        data: json!({ "tasks": tasks }),
    })
}

async fn task_show(inv: &Invocation, args: TaskShowArgs) -> CliResult<CommandOutput> {
    let session = open_session(inv).await?;
    let task = resolve_task_selector(&session, &args.id)?;
    let category = task
        .backlog_category_id
        .as_deref()
        .and_then(|id| session.categories().iter().find(|category| category.id == id));

    Ok(CommandOutput {
        command: "task.show",
        board: Some(session.board().name.clone()),
        text: render_task_detail(task, category),
        data: json!({ "task": task, "category": category }),
    })
}

async fn task_create(inv: &Invocation, args: TaskCreateArgs) -> CliResult<CommandOutput> {
    let title = validate_title(&args.title).map_err(validation_error)?;
    let session = open_session(inv).await?;

    let category_id = match args.category.as_deref() {
        Some(selector) => Some(resolve_category_selector(&session, selector)?.id.clone()),
        None => None,
    };
    let status = match (args.status, &category_id) {
        (Some(status), Some(_)) if status != TaskStatus::Backlog => {
            return Err(usage_error(
                "CATEGORY_REQUIRES_BACKLOG",
                "only BACKLOG tasks can have a category",
            ));
        }
        (Some(status), _) => status,
        (None, Some(_)) => TaskStatus::Backlog,
        (None, None) => TaskStatus::Todo,
    };

    let request = CreateTaskRequest {
        title,
        description: non_blank(args.description),
        status,
        position: session.next_task_position(status, category_id.as_deref()),
        tags: normalize_tags(&args.tags),
        board_id: session.board().id.clone(),
        backlog_category_id: category_id,
    };
    let task = inv
        .gateway
        .create_task(&request)
        .await
        .map_err(api_error)?;
    info!(task_id = %task.id, status = %task.status, "task created");

    Ok(CommandOutput {
        command: "task.create",
        board: Some(session.board().name.clone()),
        text: format!(
            "created task {} in {}",
            short_id(&task.id),
            task.status.label()
        ),
        data: json!({ "task": task }),
    })
}

async fn task_update(inv: &Invocation, args: TaskUpdateArgs) -> CliResult<CommandOutput> {
    let title = args
        .title
        .as_deref()
        .map(validate_title)
        .transpose()
        .map_err(validation_error)?;
    let session = open_session(inv).await?;
    let task = resolve_task_selector(&session, &args.id)?;

    let tags = if args.clear_tags {
        Some(Vec::new())
    } else if args.tags.is_empty() {
        None
    } else {
        Some(normalize_tags(&args.tags))
    };
    let patch = UpdateTaskRequest {
        title,
        description: args.description,
        tags,
        ..UpdateTaskRequest::default()
    };
    if patch.is_empty() {
        return Err(usage_error(
            "NOTHING_TO_UPDATE",
            "provide --title, --description, --tag or --clear-tags",
        ));
    }

    let updated = inv
        .gateway
        .update_task(&task.id, &patch)
        .await
        .map_err(api_error)?;
    Ok(CommandOutput {
        command: "task.update",
        board: Some(session.board().name.clone()),
        text: format!("updated task {}", short_id(&updated.id)),
        data: json!({ "task": updated }),
    })
}

async fn task_delete(inv: &Invocation, args: TaskDeleteArgs) -> CliResult<CommandOutput> {
    let session = open_session(inv).await?;
    let task_id = resolve_task_selector(&session, &args.id)?.id.clone();
    inv.gateway
        .delete_task(&task_id)
        .await
        .map_err(api_error)?;
    info!(task_id = %task_id, "task deleted");

    Ok(CommandOutput {
        command: "task.delete",
        board: Some(session.board().name.clone()),
        text: format!("deleted task {}", short_id(&task_id)),
        data: json!({ "deleted": task_id }),
    })
}

async fn task_move(inv: &Invocation, args: TaskMoveArgs) -> CliResult<CommandOutput> {
    let mut session = open_session(inv).await?;
    let task_id = resolve_task_selector(&session, &args.id)?.id.clone();
    let gateway = inv.gateway.as_ref();

    let target_args = &args.target;
    let (scope, summary) = if let Some(direction) = target_args.direction() {
        let summary = session
            .nudge(gateway, args.view, &task_id, direction)
            .await
            .map_err(engine_error)?;
        (args.view, summary)
    } else if let Some(status) = target_args.to_status {
        session
            .move_to_status(gateway, &task_id, status)
            .await
            .map_err(engine_error)?
    } else {
        let (scope, target) = if let Some(onto) = target_args.onto.as_deref() {
            let onto_id = resolve_task_selector(&session, onto)?.id.clone();
            (args.view, DragRef::task(onto_id))
        } else if let Some(category) = target_args.to_category.as_deref() {
            let container = if category.eq_ignore_ascii_case(UNCATEGORIZED) {
                UNCATEGORIZED.to_string()
            } else {
                resolve_category_selector(&session, category)?.id.clone()
            };
            (ViewScope::Backlog, DragRef::category(container))
        } else {
            return Err(usage_error(
                "MOVE_TARGET_REQUIRED",
                "provide one of --onto, --to-status, --to-category or a direction",
            ));
        };
        let summary = session
            .drop_on(gateway, scope, DragRef::task(task_id.clone()), target)
            .await
            .map_err(engine_error)?;
        (scope, summary)
    };

    if summary.is_failure() {
        return Err(commit_error(&summary));
    }

    Ok(CommandOutput {
        command: "task.move",
        board: Some(session.board().name.clone()),
        text: drop_text(&format!("task {}", short_id(&task_id)), &summary),
        data: json!({
            "view": scope,
            "task": session.task(&task_id),
            "drop": summary,
        }),
    })
}

async fn category_list(inv: &Invocation) -> CliResult<CommandOutput> {
    let session = open_session(inv).await?;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for task in session.active_tasks() {
        if task.status != TaskStatus::Backlog {
            continue;
        }
        if let Some(id) = task.backlog_category_id.as_deref() {
            *counts.entry(id.to_string()).or_default() += 1;
        }
    }

    Ok(CommandOutput {
        command: "category.list",
        board: Some(session.board().name.clone()),
        text: render_category_list(session.categories(), &counts),
        data: json!({ "categories": session.categories() }),
    })
}

async fn category_create(inv: &Invocation, args: CategoryCreateArgs) -> CliResult<CommandOutput> {
    let name = validate_name("name", &args.name).map_err(validation_error)?;
    let session = open_session(inv).await?;
    if session
        .categories()
        .iter()
        .any(|category| category.name.eq_ignore_ascii_case(&name))
    {
        return Err(conflict_error(
            "CATEGORY_EXISTS",
            format!("category '{name}' already exists"),
            None,
        ));
    }

    let request = CreateCategoryRequest {
        name,
        position: session.next_category_position(),
        board_id: session.board().id.clone(),
    };
    let category = inv
        .gateway
        .create_category(&request)
        .await
        .map_err(api_error)?;

    Ok(CommandOutput {
        command: "category.create",
        board: Some(session.board().name.clone()),
        text: format!(
            "created category {} ({})",
            category.name,
            short_id(&category.id)
        ),
        data: json!({ "category": category }),
    })
}

async fn category_rename(inv: &Invocation, args: CategoryRenameArgs) -> CliResult<CommandOutput> {
    let name = validate_name("name", &args.name).map_err(validation_error)?;
    let session = open_session(inv).await?;
    let category_id = resolve_category_selector(&session, &args.id)?.id.clone();

    let patch = UpdateCategoryRequest {
        name: Some(name),
        position: None,
    };
    let category = inv
        .gateway
        .update_category(&category_id, &patch)
        .await
        .map_err(api_error)?;

    Ok(CommandOutput {
        command: "category.rename",
        board: Some(session.board().name.clone()),
        text: format!("renamed category to {}", category.name),
        data: json!({ "category": category }),
    })
}

async fn category_delete(inv: &Invocation, args: CategoryDeleteArgs) -> CliResult<CommandOutput> {
    let mut session = open_session(inv).await?;
    let category = resolve_category_selector(&session, &args.id)?.clone();
    inv.gateway
        .delete_category(&category.id)
        .await
        .map_err(api_error)?;

    let orphaned = session
        .active_tasks()
        .iter()
        .filter(|task| task.backlog_category_id.as_deref() == Some(category.id.as_str()))
        .count();
    session.remove_category(&category.id);
    info!(category_id = %category.id, orphaned, "category deleted");

    Ok(CommandOutput {
        command: "category.delete",
        board: Some(session.board().name.clone()),
        text: format!(
            "deleted category {} ({orphaned} tasks now uncategorized)",
            category.name
        ),
        data: json!({ "deleted": category.id, "uncategorized": orphaned }),
    })
}

async fn category_move(inv: &Invocation, args: CategoryMoveArgs) -> CliResult<CommandOutput> {
    let mut session = open_session(inv).await?;
    let dragged = resolve_category_selector(&session, &args.id)?.clone();
    let onto = resolve_category_selector(&session, &args.onto)?.id.clone();

    let summary = session
        .drop_on(
            inv.gateway.as_ref(),
            ViewScope::Backlog,
            DragRef::category(dragged.id.clone()),
            DragRef::category(onto),
        )
        .await
        .map_err(engine_error)?;
    if summary.is_failure() {
        return Err(commit_error(&summary));
    }

    Ok(CommandOutput {
        command: "category.move",
        board: Some(session.board().name.clone()),
        text: drop_text(&format!("category {}", dragged.name), &summary),
        data: json!({ "categories": session.categories(), "drop": summary }),
    })
}

async fn search(inv: &Invocation, args: SearchArgs) -> CliResult<CommandOutput> {
    let parsed = parse_search_query(&args.query.join(" "));
    let query = to_search_query(&parsed);
    if query.text.is_empty() && !query.has_filters() {
        return Err(usage_error("SEARCH_QUERY_REQUIRED", "search query is empty"));
    }

    let boards = inv.gateway.list_boards().await.map_err(api_error)?;
    let scoped = match inv.board.as_deref() {
        Some(selector) => Some(resolve_board_selector(&boards, selector)?),
        None => None,
    };
    let scoped_id = scoped.map(|board| board.id.as_str());

    let found = if query.text.is_empty() {
        inv.gateway.list_tasks(scoped_id).await
    } else {
        inv.gateway.search_tasks(&query.text, scoped_id).await
    }
    .map_err(api_error)?;

    let by_id: HashMap<&str, &Board> = boards
        .iter()
        .map(|board| (board.id.as_str(), board))
        .collect();
    let tasks: Vec<Task> = found
        .into_iter()
        .filter(|task| query.matches(task, by_id.get(task.board_id.as_str()).copied()))
        .collect();

    let board_names: HashMap<String, String> = if scoped.is_some() {
        HashMap::new()
    } else {
        boards
            .iter()
            .map(|board| (board.id.clone(), board.name.clone()))
            .collect()
    };

    Ok(CommandOutput {
        command: "search",
        board: scoped.map(|board| board.name.clone()),
        text: render_task_list(&tasks, &board_names),
        data: json!({ "query": query, "chips": parsed.chips, "tasks": tasks }),
    })
}

async fn watch(inv: &Invocation, args: WatchArgs) -> CliResult<CommandOutput> {
    let session = open_session(inv).await?;
    let board_name = session.board().name.clone();
    let interval = watch_interval(&inv.settings, &args);

    emit_frame(inv, &session, args.view);

    let session = Arc::new(Mutex::new(session));
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = spawn_board_poller(
        Arc::clone(&inv.gateway),
        Arc::clone(&session),
        interval,
        Arc::clone(&stop),
        tx,
    );

    let mut refreshes = 0usize;
    let mut failures = 0usize;
    while args.max_refreshes.is_none_or(|max| refreshes < max) {
        tokio::select! {
            event = rx.recv() => match event {
                Some(PollEvent::Applied { changed: true }) => {
                    refreshes += 1;
                    let session = session.lock().await;
                    emit_frame(inv, &session, args.view);
                }
                Some(PollEvent::Applied { changed: false } | PollEvent::Deferred) => {}
                Some(PollEvent::Failed(message)) => {
                    failures += 1;
                    if !inv.json_output && !inv.quiet {
                        eprintln!("warning: {message}");
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    stop.store(true, Ordering::Relaxed);
    if let Err(err) = handle.await {
        warn!(error = %err, "poller task ended abnormally");
    }

    Ok(CommandOutput {
        command: "watch",
        board: Some(board_name),
        text: format!("stopped after {refreshes} refreshes"),
        data: json!({ "refreshes": refreshes, "failedPolls": failures }),
    })
}

fn watch_interval(settings: &Settings, args: &WatchArgs) -> Duration {
    args.interval_ms
        .map(Settings::bounded_poll_interval)
        .unwrap_or_else(|| settings.poll_interval())
}

fn config_show(inv: &Invocation) -> CommandOutput {
    let path = inv
        .config_path
        .as_ref()
        .map(|path| path.display().to_string());
    let settings = &inv.settings;
    let text = [
        format!("config file:      {}", path.as_deref().unwrap_or("(unavailable)")),
        format!("api_base_url:     {}", settings.api_base_url),
        format!(
            "default_board:    {}",
            settings.default_board.as_deref().unwrap_or("-")
        ),
        format!("poll_interval_ms: {}", settings.poll_interval_ms),
        format!("request_timeout:  {} ms", settings.request_timeout_ms),
        format!(
            "read retries:     {} (backoff {}..{} ms)",
            settings.read_retry_attempts,
            settings.retry_initial_backoff_ms,
            settings.retry_max_backoff_ms
        ),
    ]
    .join("\n");

    CommandOutput {
        command: "config.show",
        board: None,
        text,
        data: json!({ "path": path, "settings": settings }),
    }
}

/// Edits the settings file itself, so a `TASKDECK_API_URL` override in the
/// environment is not written back.
fn config_set(inv: &Invocation, args: ConfigSetArgs) -> CliResult<CommandOutput> {
    let Some(path) = inv.config_path.as_deref() else {
        return Err(runtime_error(
            "CONFIG_PATH_UNAVAILABLE",
            "unable to determine the settings file location",
            None,
        ));
    };

    let mut settings = Settings::load_from_path(path);
    let mut changed = false;
    if let Some(url) = args.api_url {
        settings.api_base_url = url;
        changed = true;
    }
    if let Some(board) = args.default_board {
        settings.default_board = Some(board);
        changed = true;
    }
    if args.clear_default_board {
        settings.default_board = None;
        changed = true;
    }
    if let Some(ms) = args.poll_interval_ms {
        settings.poll_interval_ms = ms;
        changed = true;
    }
    if let Some(ms) = args.request_timeout_ms {
        settings.request_timeout_ms = ms;
        changed = true;
    }
    if !changed {
        return Err(usage_error(
            "NOTHING_TO_UPDATE",
            "provide --api-url, --default-board, --clear-default-board, --poll-interval-ms or --request-timeout-ms",
        ));
    }

    settings.save_to_path(path).map_err(|err| {
        error!(error = %err, path = %path.display(), "failed to save settings");
        runtime_error("CONFIG_WRITE_FAILED", format_anyhow_error_chain(&err), None)
    })?;
    let saved = Settings::load_from_path(path);
    info!(path = %path.display(), "settings saved");

    Ok(CommandOutput {
        command: "config.set",
        board: None,
        text: format!("saved settings to {}", path.display()),
        data: json!({ "path": path.display().to_string(), "settings": saved }),
    })
}

fn emit_frame(inv: &Invocation, session: &BoardSession, scope: ViewScope) {
    if inv.quiet {
        return;
    }
    if inv.json_output {
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "command": "watch.frame",
            "board": session.board().name,
            "data": { "buckets": buckets_json(session.engine(scope)) }
        });
        println!("{payload}");
    } else {
        println!("{}\n", render_scope(session, scope));
    }
}

fn view_output(command: &'static str, session: &BoardSession, scope: ViewScope) -> CommandOutput {
    let engine = session.engine(scope);
    CommandOutput {
        command,
        board: Some(session.board().name.clone()),
        data: json!({
            "board": session.board(),
            "stale": engine.is_stale(),
            "buckets": buckets_json(engine),
        }),
        text: render_scope(session, scope),
    }
}

fn render_scope(session: &BoardSession, scope: ViewScope) -> String {
    let engine = session.engine(scope);
    match scope {
        ViewScope::Board => render_board(session.board(), engine),
        ViewScope::Backlog => render_backlog(session.board(), engine),
    }
}

fn buckets_json(engine: &DragEngine) -> Vec<Value> {
    engine
        .columns()
        .into_iter()
        .map(|(key, tasks)| json!({ "bucket": key.container_id(), "tasks": tasks }))
        .collect()
}

fn drop_text(subject: &str, summary: &DropSummary) -> String {
    if summary.updates == 0 {
        format!("{subject} is already in place")
    } else {
        format!("moved {subject} ({} updates)", summary.updates)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

async fn open_session(inv: &Invocation) -> CliResult<BoardSession> {
    let selector = inv
        .board
        .as_deref()
        .or(inv.settings.default_board.as_deref())
        .ok_or_else(|| {
            usage_error(
                "BOARD_REQUIRED",
                "provide --board or set default_board in the settings file",
            )
        })?;

    let boards = inv.gateway.list_boards().await.map_err(api_error)?;
    let board = resolve_board_selector(&boards, selector)?.clone();
    BoardSession::load(inv.gateway.as_ref(), board, Utc::now())
        .await
        .map_err(api_error)
}

struct SelectorKind {
    label: &'static str,
    not_found: &'static str,
    ambiguous: &'static str,
}

const BOARD_SELECTOR: SelectorKind = SelectorKind {
    label: "board",
    not_found: "BOARD_NOT_FOUND",
    ambiguous: "BOARD_AMBIGUOUS",
};

const TASK_SELECTOR: SelectorKind = SelectorKind {
    label: "task",
    not_found: "TASK_NOT_FOUND",
    ambiguous: "TASK_ID_AMBIGUOUS",
};

const CATEGORY_SELECTOR: SelectorKind = SelectorKind {
    label: "category",
    not_found: "CATEGORY_NOT_FOUND",
    ambiguous: "CATEGORY_AMBIGUOUS",
};

/// Exact id, then case-insensitive name, then unique id prefix.
fn resolve_selector<'a, T>(
    items: &'a [T],
    selector: &str,
    kind: &SelectorKind,
    id_of: impl Fn(&T) -> &str,
    name_of: impl Fn(&T) -> Option<&str>,
) -> CliResult<&'a T> {
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return Err(usage_error(
            kind.not_found,
            format!("{} selector cannot be empty", kind.label),
        ));
    }

    if let Some(exact) = items.iter().find(|item| id_of(item) == trimmed) {
        return Ok(exact);
    }

    let by_name: Vec<&T> = items
        .iter()
        .filter(|item| name_of(item).is_some_and(|name| name.eq_ignore_ascii_case(trimmed)))
        .collect();
    if !by_name.is_empty() {
        return pick_single(by_name, selector, kind, &id_of);
    }

    let needle = trimmed.to_ascii_lowercase();
    let mut seen = HashSet::new();
    let by_prefix: Vec<&T> = items
        .iter()
        .filter(|item| id_of(item).to_ascii_lowercase().starts_with(&needle))
        .filter(|item| seen.insert(id_of(item).to_string()))
        .collect();
    pick_single(by_prefix, selector, kind, &id_of)
}

fn pick_single<'a, T>(
    matches: Vec<&'a T>,
    selector: &str,
    kind: &SelectorKind,
    id_of: &impl Fn(&T) -> &str,
) -> CliResult<&'a T> {
    match matches.as_slice() {
        [single] => Ok(*single),
        [] => Err(not_found_error(
            kind.not_found,
            format!("{} '{}' not found", kind.label, selector),
        )),
        many => Err(conflict_error(
            kind.ambiguous,
            format!(
                "{} selector '{}' matches {} items; use a longer id",
                kind.label,
                selector,
                many.len()
            ),
            Some(json!({
                "matches": many.iter().map(|item| id_of(item).to_string()).collect::<Vec<_>>()
            })),
        )),
    }
}

fn resolve_board_selector<'a>(boards: &'a [Board], selector: &str) -> CliResult<&'a Board> {
    resolve_selector(
        boards,
        selector,
        &BOARD_SELECTOR,
        |board| board.id.as_str(),
        |board| Some(board.name.as_str()),
    )
}

fn resolve_task_selector<'a>(session: &'a BoardSession, selector: &str) -> CliResult<&'a Task> {
    let id = {
        let all: Vec<&Task> = session
            .active_tasks()
            .iter()
            .chain(session.archived_tasks())
            .collect();
        resolve_selector(&all, selector, &TASK_SELECTOR, |task| task.id.as_str(), |_| None)?
            .id
            .clone()
    };
    session.task(&id).ok_or_else(|| {
        not_found_error(TASK_SELECTOR.not_found, format!("task '{selector}' not found"))
    })
}

fn resolve_category_selector<'a>(
    session: &'a BoardSession,
    selector: &str,
) -> CliResult<&'a BacklogCategory> {
    resolve_selector(
        session.categories(),
        selector,
        &CATEGORY_SELECTOR,
        |category| category.id.as_str(),
        |category| Some(category.name.as_str()),
    )
}

fn usage_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 2,
        code,
        message: message.into(),
        details: None,
    }
}

fn not_found_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 3,
        code,
        message: message.into(),
        details: None,
    }
}

fn conflict_error(
    code: &'static str,
    message: impl Into<String>,
    details: Option<Value>,
) -> CliError {
    CliError {
        exit_code: 4,
        code,
        message: message.into(),
        details,
    }
}

fn runtime_error(code: &'static str, message: impl Into<String>, details: Option<Value>) -> CliError {
    CliError {
        exit_code: 5,
        code,
        message: message.into(),
        details,
    }
}

fn validation_error(err: ValidationError) -> CliError {
    conflict_error("VALIDATION_FAILED", err.to_string(), None)
}

fn engine_error(err: EngineError) -> CliError {
    let code = match err {
        EngineError::UnknownTask(_) | EngineError::UnknownCategory(_) => "NOT_IN_VIEW",
        _ => "MOVE_REJECTED",
    };
    conflict_error(code, err.to_string(), None)
}

fn api_error(err: ApiError) -> CliError {
    warn!(error = %err, "backend request failed");
    let details = Some(json!({ "status": err.status(), "code": err.code() }));
    let message = err.user_message();
    if err.is_not_found() {
        return CliError {
            details,
            ..not_found_error("NOT_FOUND", message)
        };
    }
    match err.status() {
        Some(409) => conflict_error("CONFLICT", message, details),
        Some(400 | 422) => conflict_error("REJECTED", message, details),
        _ => runtime_error("BACKEND_ERROR", message, details),
    }
}

fn commit_error(summary: &DropSummary) -> CliError {
    let message = summary.error.clone().unwrap_or_else(|| {
        format!(
            "{} of {} updates failed",
            summary.failed, summary.updates
        )
    });
    runtime_error("COMMIT_FAILED", message, serde_json::to_value(summary).ok())
}

fn print_success(output: CommandOutput, json_output: bool, quiet: bool) {
    if json_output {
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "command": output.command,
            "board": output.board,
            "data": output.data
        });
        match serde_json::to_string_pretty(&payload) {
            Ok(value) => println!("{value}"),
            Err(_) => println!("{}", payload),
        }
        return;
    }

    if quiet {
        return;
    }

    if output.text.is_empty() {
        println!("ok");
    } else {
        println!("{}", output.text);
    }
}

fn print_error(err: &CliError, json_output: bool) {
    error!(
        code = err.code,
        message = %err.message,
        details = ?err.details,
        "cli command failed"
    );

    if json_output {
        let payload = json!({
            "schema_version": SCHEMA_VERSION,
            "error": {
                "code": err.code,
                "message": err.message,
                "details": err.details
            }
        });
        match serde_json::to_string_pretty(&payload) {
            Ok(value) => eprintln!("{value}"),
            Err(_) => eprintln!("{}", payload),
        }
        return;
    }

    eprintln!("error[{}]: {}", err.code, err.message);
}

fn format_anyhow_error_chain(err: &anyhow::Error) -> String {
    let mut seen = HashSet::new();
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        if seen.contains(&text) {
            continue;
        }
        seen.insert(text.clone());
        parts.push(text);
    }

    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::{Call, FakeGateway};
    use crate::ordering::test_support::{backlog_task, task};

    fn boards() -> Vec<Board> {
        vec![
            Board {
                id: "board-1".to_string(),
                name: "Platform".to_string(),
                description: None,
            },
            Board {
                id: "board-2".to_string(),
                name: "Mobile".to_string(),
                description: None,
            },
        ]
    }

    fn category(id: &str, name: &str, position: i64) -> BacklogCategory {
        BacklogCategory {
            id: id.to_string(),
            name: name.to_string(),
            position,
            board_id: "board-1".to_string(),
        }
    }

    fn fixture() -> Arc<FakeGateway> {
        let mut tagged = task("todo-b", TaskStatus::Todo, 1);
        tagged.tags = vec!["ui".to_string()];
        let mut elsewhere = task("mob-1", TaskStatus::Todo, 0);
        elsewhere.board_id = "board-2".to_string();
        elsewhere.tags = vec!["ui".to_string()];

        Arc::new(FakeGateway::new(
            boards(),
            vec![
                backlog_task("crit-1", Some("cat-crit"), 0),
                task("todo-a", TaskStatus::Todo, 0),
                tagged,
                elsewhere,
            ],
            vec![
                category("cat-crit", "Critical", 0),
                category("cat-nice", "Nice", 1),
            ],
        ))
    }

    fn invocation(gateway: &Arc<FakeGateway>, board: Option<&str>) -> Invocation {
        let gateway: Arc<dyn Gateway> = Arc::clone(gateway) as Arc<dyn Gateway>;
        Invocation {
            gateway,
            settings: Settings::default(),
            config_path: None,
            board: board.map(str::to_string),
            json_output: false,
            quiet: true,
        }
    }

    fn move_args(id: &str) -> TaskMoveArgs {
        TaskMoveArgs {
            id: id.to_string(),
            view: ViewScope::Board,
            target: MoveTargetArgs::default(),
        }
    }

    async fn run_task(
        gateway: &Arc<FakeGateway>,
        command: TaskCommand,
    ) -> CliResult<CommandOutput> {
        execute(
            &invocation(gateway, Some("Platform")),
            RootCommand::Task { command },
        )
        .await
    }

    #[tokio::test]
    async fn board_is_required_without_default() {
        let gateway = fixture();
        let err = execute(
            &invocation(&gateway, None),
            RootCommand::Backlog {
                command: ViewCommand::Show,
            },
        )
        .await
        .expect_err("board should be required");
        assert_eq!(err.exit_code, 2);
        assert_eq!(err.code, "BOARD_REQUIRED");
    }

    #[tokio::test]
    async fn default_board_comes_from_settings() {
        let gateway = fixture();
        let mut inv = invocation(&gateway, None);
        inv.settings.default_board = Some("mobile".to_string());
        let output = execute(
            &inv,
            RootCommand::Board {
                command: BoardCommand::Show,
            },
        )
        .await
        .expect("board should resolve from settings");
        assert_eq!(output.board.as_deref(), Some("Mobile"));
    }

    #[test]
    fn board_selector_prefers_id_then_name_then_prefix() {
        let boards = boards();
        assert_eq!(
            resolve_board_selector(&boards, "board-2").map(|b| b.name.as_str()).ok(),
            Some("Mobile")
        );
        assert_eq!(
            resolve_board_selector(&boards, "platform").map(|b| b.id.as_str()).ok(),
            Some("board-1")
        );

        let err = resolve_board_selector(&boards, "board").expect_err("prefix is ambiguous");
        assert_eq!(err.exit_code, 4);
        assert_eq!(err.code, "BOARD_AMBIGUOUS");
        assert_eq!(
            err.details,
            Some(json!({ "matches": ["board-1", "board-2"] }))
        );

        let missing = resolve_board_selector(&boards, "nope").expect_err("unknown board");
        assert_eq!(missing.exit_code, 3);
    }

    #[tokio::test]
    async fn move_to_category_sends_single_update() {
        let gateway = fixture();
        let mut args = move_args("crit-1");
        args.target.to_category = Some("nice".to_string());

        let output = run_task(&gateway, TaskCommand::Move(args))
            .await
            .expect("move should succeed");

        assert_eq!(
            gateway.write_calls(),
            vec![Call::UpdateTask(
                "crit-1".to_string(),
                UpdateTaskRequest {
                    position: Some(0),
                    backlog_category_id: Some(Some("cat-nice".to_string())),
                    ..UpdateTaskRequest::default()
                }
            )]
        );
        assert_eq!(output.data["view"], json!("backlog"));
        assert_eq!(output.data["drop"]["status"], json!("confirmed"));
        assert_eq!(output.data["task"]["backlogCategoryId"], json!("cat-nice"));
    }

    #[tokio::test]
    async fn move_to_uncategorized_clears_category() {
        let gateway = fixture();
        let mut args = move_args("crit-1");
        args.target.to_category = Some("Uncategorized".to_string());

        run_task(&gateway, TaskCommand::Move(args))
            .await
            .expect("move should succeed");

        assert_eq!(
            gateway
                .stored_task("crit-1")
                .map(|task| task.backlog_category_id),
            Some(None)
        );
    }

    #[tokio::test]
    async fn move_onto_upper_task_reorders_column() {
        let gateway = fixture();
        let mut args = move_args("todo-b");
        args.target.onto = Some("todo-a".to_string());

        run_task(&gateway, TaskCommand::Move(args))
            .await
            .expect("move should succeed");

        let positions: Vec<(String, i64)> = ["todo-a", "todo-b"]
            .iter()
            .filter_map(|id| gateway.stored_task(id))
            .map(|task| (task.id, task.position))
            .collect();
        assert_eq!(
            positions,
            vec![("todo-a".to_string(), 1), ("todo-b".to_string(), 0)]
        );
    }

    #[tokio::test]
    async fn move_onto_lower_task_lands_after_it() {
        let gateway = fixture();
        let mut args = move_args("todo-a");
        args.target.onto = Some("todo-b".to_string());

        let output = run_task(&gateway, TaskCommand::Move(args))
            .await
            .expect("move should succeed");

        assert_eq!(output.data["drop"]["status"], json!("confirmed"));
        let positions: Vec<(String, i64)> = ["todo-a", "todo-b"]
            .iter()
            .filter_map(|id| gateway.stored_task(id))
            .map(|task| (task.id, task.position))
            .collect();
        assert_eq!(
            positions,
            vec![("todo-a".to_string(), 1), ("todo-b".to_string(), 0)]
        );
    }

    #[tokio::test]
    async fn move_onto_task_in_other_view_is_rejected() {
        let gateway = fixture();
        let mut args = move_args("crit-1");
        args.view = ViewScope::Backlog;
        args.target.onto = Some("todo-a".to_string());

        let err = run_task(&gateway, TaskCommand::Move(args))
            .await
            .expect_err("todo-a is not in the backlog view");

        assert_eq!(err.exit_code, 4);
        assert_eq!(err.code, "NOT_IN_VIEW");
        assert!(gateway.write_calls().is_empty());
    }

    #[tokio::test]
    async fn to_status_takes_backlog_task_onto_board() {
        let gateway = fixture();
        let mut args = move_args("crit-1");
        args.target.to_status = Some(TaskStatus::Todo);

        let output = run_task(&gateway, TaskCommand::Move(args))
            .await
            .expect("status change should succeed");

        assert_eq!(output.data["view"], json!("board"));
        assert_eq!(
            gateway.write_calls(),
            vec![Call::UpdateTask(
                "crit-1".to_string(),
                UpdateTaskRequest {
                    status: Some(TaskStatus::Todo),
                    position: Some(2),
                    ..UpdateTaskRequest::default()
                }
            )]
        );
    }

    #[tokio::test]
    async fn nudge_down_at_bottom_is_noop() {
        let gateway = fixture();
        let mut args = move_args("todo-b");
        args.target.down = true;

        let output = run_task(&gateway, TaskCommand::Move(args))
            .await
            .expect("nudge should succeed");

        assert!(gateway.write_calls().is_empty());
        assert_eq!(output.text, "task todo-b is already in place");
    }

    #[tokio::test]
    async fn failed_commit_maps_to_runtime_error() {
        let gateway = fixture();
        gateway.fail_writes_for("todo-b");
        let mut args = move_args("todo-b");
        args.target.to_status = Some(TaskStatus::InProgress);

        let err = run_task(&gateway, TaskCommand::Move(args))
            .await
            .expect_err("commit should fail");

        assert_eq!(err.exit_code, 5);
        assert_eq!(err.code, "COMMIT_FAILED");
        assert_eq!(
            err.details.as_ref().map(|details| details["status"].clone()),
            Some(json!("rolled_back"))
        );
    }

    #[tokio::test]
    async fn move_of_task_outside_view_is_rejected() {
        let gateway = fixture();
        let mut args = move_args("todo-a");
        args.target.to_category = Some("Critical".to_string());

        let err = run_task(&gateway, TaskCommand::Move(args))
            .await
            .expect_err("todo task is not in the backlog view");

        assert_eq!(err.exit_code, 4);
        assert_eq!(err.code, "NOT_IN_VIEW");
        assert!(gateway.write_calls().is_empty());
    }

    #[tokio::test]
    async fn create_validates_before_any_request() {
        let gateway = fixture();
        let err = run_task(
            &gateway,
            TaskCommand::Create(TaskCreateArgs {
                title: "   ".to_string(),
                description: None,
                status: None,
                category: None,
                tags: Vec::new(),
            }),
        )
        .await
        .expect_err("blank title should fail");

        assert_eq!(err.exit_code, 4);
        assert_eq!(err.code, "VALIDATION_FAILED");
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn create_with_category_appends_to_backlog() {
        let gateway = fixture();
        let output = run_task(
            &gateway,
            TaskCommand::Create(TaskCreateArgs {
                title: "  Rotate keys ".to_string(),
                description: Some(" ".to_string()),
                status: None,
                category: Some("Critical".to_string()),
                tags: vec!["sec".to_string(), "SEC".to_string()],
            }),
        )
        .await
        .expect("create should succeed");

        let task = &output.data["task"];
        assert_eq!(task["title"], json!("Rotate keys"));
        assert_eq!(task["status"], json!("BACKLOG"));
        assert_eq!(task["position"], json!(1));
        assert_eq!(task["backlogCategoryId"], json!("cat-crit"));
        assert_eq!(task["tags"], json!(["sec"]));
        assert!(task.get("description").is_none_or(Value::is_null));
    }

    #[tokio::test]
    async fn create_rejects_category_for_non_backlog_status() {
        let gateway = fixture();
        let err = run_task(
            &gateway,
            TaskCommand::Create(TaskCreateArgs {
                title: "Rotate keys".to_string(),
                description: None,
                status: Some(TaskStatus::Done),
                category: Some("Critical".to_string()),
                tags: Vec::new(),
            }),
        )
        .await
        .expect_err("category needs backlog status");
        assert_eq!(err.code, "CATEGORY_REQUIRES_BACKLOG");
        assert!(gateway.write_calls().is_empty());
    }

    #[tokio::test]
    async fn update_requires_a_change() {
        let gateway = fixture();
        let err = run_task(
            &gateway,
            TaskCommand::Update(TaskUpdateArgs {
                id: "todo-a".to_string(),
                title: None,
                description: None,
                tags: Vec::new(),
                clear_tags: false,
            }),
        )
        .await
        .expect_err("empty patch should fail");
        assert_eq!(err.exit_code, 2);
        assert!(gateway.write_calls().is_empty());
    }

    #[tokio::test]
    async fn task_prefix_must_be_unique() {
        let gateway = fixture();
        let err = run_task(
            &gateway,
            TaskCommand::Show(TaskShowArgs {
                id: "todo".to_string(),
            }),
        )
        .await
        .expect_err("prefix matches two tasks");
        assert_eq!(err.code, "TASK_ID_AMBIGUOUS");

        let output = run_task(
            &gateway,
            TaskCommand::Show(TaskShowArgs {
                id: "crit".to_string(),
            }),
        )
        .await
        .expect("unique prefix should resolve");
        assert_eq!(output.data["category"]["name"], json!("Critical"));
    }

    #[tokio::test]
    async fn category_move_persists_changed_positions_only() {
        let gateway = fixture();
        let output = execute(
            &invocation(&gateway, Some("Platform")),
            RootCommand::Category {
                command: CategoryCommand::Move(CategoryMoveArgs {
                    id: "Nice".to_string(),
                    onto: "Critical".to_string(),
                }),
            },
        )
        .await
        .expect("category move should succeed");

        assert_eq!(gateway.write_calls().len(), 2);
        let names: Vec<String> = gateway
            .stored_categories()
            .into_iter()
            .map(|category| format!("{}:{}", category.name, category.position))
            .collect();
        assert!(names.contains(&"Nice:0".to_string()));
        assert!(names.contains(&"Critical:1".to_string()));
        assert_eq!(output.data["categories"][0]["name"], json!("Nice"));
    }

    #[tokio::test]
    async fn category_create_rejects_duplicate_name() {
        let gateway = fixture();
        let err = execute(
            &invocation(&gateway, Some("Platform")),
            RootCommand::Category {
                command: CategoryCommand::Create(CategoryCreateArgs {
                    name: "critical".to_string(),
                }),
            },
        )
        .await
        .expect_err("duplicate should fail");
        assert_eq!(err.code, "CATEGORY_EXISTS");
        assert!(gateway.write_calls().is_empty());
    }

    #[tokio::test]
    async fn category_delete_reports_orphans() {
        let gateway = fixture();
        let output = execute(
            &invocation(&gateway, Some("Platform")),
            RootCommand::Category {
                command: CategoryCommand::Delete(CategoryDeleteArgs {
                    id: "Critical".to_string(),
                }),
            },
        )
        .await
        .expect("delete should succeed");
        assert_eq!(output.data["uncategorized"], json!(1));
        assert_eq!(
            gateway.write_calls(),
            vec![Call::DeleteCategory("cat-crit".to_string())]
        );
    }

    #[tokio::test]
    async fn search_is_global_without_board() {
        let gateway = fixture();
        let output = execute(
            &invocation(&gateway, None),
            RootCommand::Search(SearchArgs {
                query: vec!["tag:UI".to_string()],
            }),
        )
        .await
        .expect("search should succeed");

        let ids: Vec<&str> = output.data["tasks"]
            .as_array()
            .map(|tasks| tasks.iter().filter_map(|task| task["id"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(ids, vec!["todo-b", "mob-1"]);
        assert!(output.text.contains("Mobile"));
        assert_eq!(output.board, None);
    }

    #[tokio::test]
    async fn search_scoped_to_board_uses_free_text() {
        let gateway = fixture();
        let output = execute(
            &invocation(&gateway, Some("Mobile")),
            RootCommand::Search(SearchArgs {
                query: vec!["task".to_string(), "status:todo".to_string()],
            }),
        )
        .await
        .expect("search should succeed");

        assert_eq!(output.data["tasks"].as_array().map(Vec::len), Some(1));
        assert!(
            gateway
                .calls()
                .contains(&Call::SearchTasks("task".to_string()))
        );
    }

    #[test]
    fn api_errors_map_to_exit_codes() {
        let missing = api_error(ApiError::http("GET", "/tasks/x", 404, "NOT_FOUND", "gone"));
        assert_eq!(missing.exit_code, 3);
        assert_eq!(
            missing.details,
            Some(json!({ "status": 404, "code": "NOT_FOUND" }))
        );

        let conflict = api_error(ApiError::http("PATCH", "/tasks/x", 409, "STALE", "stale"));
        assert_eq!((conflict.exit_code, conflict.code), (4, "CONFLICT"));

        let rejected = api_error(ApiError::http("POST", "/tasks", 422, "INVALID", "bad"));
        assert_eq!((rejected.exit_code, rejected.code), (4, "REJECTED"));

        let server = api_error(ApiError::http("GET", "/boards", 503, "UNAVAILABLE", "down"));
        assert_eq!((server.exit_code, server.code), (5, "BACKEND_ERROR"));
    }

    #[test]
    fn anyhow_chain_is_deduplicated() {
        let err = anyhow::anyhow!("connection refused")
            .context("failed to build client")
            .context("failed to build client");
        assert_eq!(
            format_anyhow_error_chain(&err),
            "failed to build client: connection refused"
        );
    }

    #[test]
    fn watch_interval_is_held_to_settings_bounds() {
        let settings = Settings::default();
        let mut args = WatchArgs {
            view: ViewScope::Board,
            interval_ms: Some(0),
            max_refreshes: None,
        };
        assert_eq!(watch_interval(&settings, &args), Duration::from_secs(1));

        args.interval_ms = None;
        assert_eq!(watch_interval(&settings, &args), settings.poll_interval());
    }

    #[tokio::test]
    async fn config_set_writes_settings_file() {
        let gateway = fixture();
        let temp_dir = tempfile::TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("taskdeck").join("settings.toml");
        let mut inv = invocation(&gateway, None);
        inv.config_path = Some(path.clone());

        let output = execute(
            &inv,
            RootCommand::Config {
                command: ConfigCommand::Set(ConfigSetArgs {
                    default_board: Some("Platform".to_string()),
                    poll_interval_ms: Some(10),
                    ..ConfigSetArgs::default()
                }),
            },
        )
        .await
        .expect("config set should succeed");

        let saved = Settings::load_from_path(&path);
        assert_eq!(saved.default_board.as_deref(), Some("Platform"));
        assert_eq!(saved.poll_interval_ms, 1_000);
        assert_eq!(output.data["settings"]["poll_interval_ms"], json!(1_000));

        let err = execute(
            &inv,
            RootCommand::Config {
                command: ConfigCommand::Set(ConfigSetArgs::default()),
            },
        )
        .await
        .expect_err("an empty edit is refused");
        assert_eq!(err.code, "NOTHING_TO_UPDATE");
    }

    #[tokio::test]
    async fn watch_redraws_after_remote_change() {
        let gateway = fixture();
        let inv = invocation(&gateway, Some("Platform"));
        let args = WatchArgs {
            view: ViewScope::Board,
            interval_ms: Some(10),
            max_refreshes: Some(1),
        };

        let edit = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            gateway.edit_task("todo-a", |task| task.title = "Renamed".to_string());
        };
        let (output, ()) = tokio::time::timeout(
            Duration::from_secs(5),
            async { tokio::join!(execute(&inv, RootCommand::Watch(args)), edit) },
        )
        .await
        .expect("watch should stop after one refresh");

        let output = output.expect("watch should succeed");
        assert_eq!(output.data["refreshes"], json!(1));
    }
}
