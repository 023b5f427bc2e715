//! Subcommands of the `todo-sync` binary.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use color_eyre::{eyre::eyre, Report, Result};

use todo_sync::todos::{CreateTodoRequest, FilterState, Priority, Status, Todo, UpdateTodoRequest};
use todo_sync::{ApiError, App};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Sign in with email and password
  Login {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  /// Create an account and sign in
  Register {
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  /// Sign out and forget the stored session
  Logout,
  /// Show the signed-in user
  Whoami,
  /// List todos
  List(ListArgs),
  /// List todos created by or assigned to you
  Mine,
  /// Show one todo
  Show { id: u64 },
  /// Create a todo
  Create(CreateArgs),
  /// Change fields of a todo
  Update(UpdateArgs),
  /// Toggle the starred flag
  Star { id: u64 },
  /// Delete a todo
  Delete { id: u64 },
  /// List users
  Users,
}

#[derive(Args, Debug)]
pub struct ListArgs {
  /// Status filter, comma separated (pending, in-progress, completed)
  #[arg(long, value_delimiter = ',')]
  status: Vec<Status>,
  /// Priority filter, comma separated (high, medium, low)
  #[arg(long, value_delimiter = ',')]
  priority: Vec<Priority>,
  /// Assignee user ids, comma separated
  #[arg(long = "assigned-to", value_delimiter = ',')]
  assigned_to: Vec<u64>,
  /// Only starred todos
  #[arg(long)]
  starred: bool,
  /// Case-insensitive text matched against title and description
  #[arg(long)]
  search: Option<String>,
  /// Ignore cached data
  #[arg(long)]
  refresh: bool,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
  #[arg(long)]
  title: String,
  #[arg(long)]
  description: Option<String>,
  /// Due date: YYYY-MM-DD or RFC 3339
  #[arg(long, value_parser = parse_date)]
  due: DateTime<Utc>,
  #[arg(long, value_parser = parse_date)]
  reminder: Option<DateTime<Utc>>,
  #[arg(long)]
  status: Option<Status>,
  #[arg(long)]
  priority: Option<Priority>,
  #[arg(long)]
  starred: bool,
  /// Assignee user ids, comma separated
  #[arg(long = "assign", value_delimiter = ',')]
  assign: Vec<u64>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
  id: u64,
  #[arg(long)]
  title: Option<String>,
  #[arg(long)]
  description: Option<String>,
  #[arg(long, value_parser = parse_date)]
  due: Option<DateTime<Utc>>,
  #[arg(long)]
  status: Option<Status>,
  #[arg(long)]
  priority: Option<Priority>,
  /// Replace the assignees, comma separated
  #[arg(long = "assign", value_delimiter = ',')]
  assign: Option<Vec<u64>>,
}

pub async fn run(app: &App, command: Command) -> Result<()> {
  match command {
    Command::Login { email, password } => {
      let session = app.auth.login(&email, &password).await.map_err(report)?;
      println!("Signed in as {} <{}>", session.display_name, session.email);
    }
    Command::Register {
      username,
      email,
      password,
    } => {
      let session = app
        .auth
        .register(&username, &email, &password)
        .await
        .map_err(report)?;
      println!("Registered and signed in as {}", session.display_name);
    }
    Command::Logout => {
      app.auth.logout().await.map_err(report)?;
      println!("Signed out");
    }
    Command::Whoami => match app.session.current() {
      Some(session) => println!(
        "{} <{}> (id {}, since {})",
        session.display_name,
        session.email,
        session.user_id,
        session.issued_at.format("%Y-%m-%d %H:%M")
      ),
      None => println!("Not signed in"),
    },
    Command::List(args) => {
      require_session(app)?;
      let filter = FilterState {
        status: args.status,
        priority: args.priority,
        assigned_to: args.assigned_to,
        starred: args.starred.then_some(true),
        search_text: args.search.unwrap_or_default(),
      };
      let todos = if args.refresh {
        app.todos.refetch_todos(&filter).await
      } else {
        app.todos.todos(&filter).await.map(|r| r.data)
      }
      .map_err(report)?;
      print_list(&todos);
    }
    Command::Mine => {
      require_session(app)?;
      let todos = app.todos.my_todos().await.map_err(report)?;
      print_list(&todos);
    }
    Command::Show { id } => {
      require_session(app)?;
      let todo = app.todos.todo(id).await.map_err(report)?;
      print_detail(&todo);
    }
    Command::Create(args) => {
      require_session(app)?;
      let request = CreateTodoRequest {
        description: args.description,
        reminder_date: args.reminder,
        status: args.status,
        priority: args.priority,
        starred: args.starred.then_some(true),
        assigned_to: (!args.assign.is_empty()).then_some(args.assign),
        ..CreateTodoRequest::new(args.title, args.due)
      };
      let todo = app.mutations.create(&request).await.map_err(report)?;
      println!("Created #{}", todo.id);
    }
    Command::Update(args) => {
      require_session(app)?;
      let patch = UpdateTodoRequest {
        title: args.title,
        description: args.description,
        due_date: args.due,
        status: args.status,
        priority: args.priority,
        assigned_to: args.assign,
        ..Default::default()
      };
      if patch == UpdateTodoRequest::default() {
        return Err(eyre!("Nothing to update"));
      }
      let todo = app.mutations.update(args.id, &patch).await.map_err(report)?;
      print_detail(&todo);
    }
    Command::Star { id } => {
      require_session(app)?;
      let todo = app.todos.todo(id).await.map_err(report)?;
      let todo = app.mutations.toggle_starred(&todo).await.map_err(report)?;
      println!(
        "#{} {}",
        todo.id,
        if todo.starred { "starred" } else { "unstarred" }
      );
    }
    Command::Delete { id } => {
      require_session(app)?;
      app.mutations.remove(id).await.map_err(report)?;
      println!("Deleted #{}", id);
    }
    Command::Users => {
      require_session(app)?;
      let users = app.todos.users().await.map_err(report)?;
      for user in users {
        println!("{:>4}  {:<20} {}", user.id, user.username, user.email);
      }
    }
  }

  Ok(())
}

fn require_session(app: &App) -> Result<()> {
  if app.session.is_authenticated() {
    Ok(())
  } else {
    Err(eyre!("Not signed in. Run `todo-sync login` first."))
  }
}

fn report(err: ApiError) -> Report {
  match err.description() {
    Some(description) if description != err.headline() => {
      eyre!("{}: {}", err.headline(), description)
    }
    _ => eyre!("{}", err.headline()),
  }
}

fn parse_date(s: &str) -> std::result::Result<DateTime<Utc>, String> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Ok(dt.with_timezone(&Utc));
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|dt| dt.and_utc())
    .ok_or_else(|| format!("invalid date '{}' (expected YYYY-MM-DD or RFC 3339)", s))
}

fn print_list(todos: &[Todo]) {
  if todos.is_empty() {
    println!("No todos");
    return;
  }
  for todo in todos {
    println!(
      "{:>4} {} {:<11} {:<6} {}  (due {})",
      todo.id,
      if todo.starred { "*" } else { " " },
      todo.status,
      todo.priority,
      todo.title,
      todo.due_date.format("%Y-%m-%d")
    );
  }
}

fn print_detail(todo: &Todo) {
  println!("#{} {}{}", todo.id, todo.title, if todo.starred { " *" } else { "" });
  println!("  status:   {}", todo.status);
  println!("  priority: {}", todo.priority);
  println!("  due:      {}", todo.due_date.format("%Y-%m-%d %H:%M"));
  if let Some(reminder) = todo.reminder_date {
    println!("  reminder: {}", reminder.format("%Y-%m-%d %H:%M"));
  }
  if !todo.assigned_to.is_empty() {
    let names: Vec<&str> = todo.assigned_to.iter().map(|u| u.username.as_str()).collect();
    println!("  assigned: {}", names.join(", "));
  }
  if let Some(description) = &todo.description {
    println!();
    println!("  {}", description);
  }
  if !todo.subtasks.is_empty() {
    let (done, total) = todo.subtask_progress();
    println!();
    println!("  subtasks ({}/{}):", done, total);
    for subtask in &todo.subtasks {
      println!("    [{}] {}", if subtask.completed { "x" } else { " " }, subtask.title);
    }
  }
}
