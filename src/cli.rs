use crate::{
    api::ApiClient,
    auth::{AccountKind, Auth, RegistrationForm},
    catalog::{self, Source},
    config::{Config, CONFIG_DIR},
    kv::KvStore,
    listing::{self, AppendOutcome, ListingStore},
    product::{Product, ProductDraft},
    session,
};
use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::path::PathBuf;
use uuid::Uuid;

pub struct Context {
    pub config: Config,
    pub kv: Box<dyn KvStore>,
    pub api: Box<dyn ApiClient>,
    /// Listings printed by the last `list`, so `show`/`purge` positions
    /// refer to what the user saw. `None` until a list is shown, and again
    /// after any command that changes listings or the session.
    pub last_shown: RefCell<Option<Vec<Product>>>,
}

impl Context {
    pub fn new(config: Config, kv: Box<dyn KvStore>, api: Box<dyn ApiClient>) -> Self {
        Self {
            config,
            kv,
            api,
            last_shown: RefCell::new(None),
        }
    }

    fn listings(&self) -> ListingStore<'_> {
        ListingStore::new(self.kv.as_ref())
    }

    fn auth(&self) -> Auth<'_> {
        Auth::new(
            self.api.as_ref(),
            self.kv.as_ref(),
            self.config.auth.local_fallback,
        )
    }
}

#[derive(Args, Debug, Clone)]
pub struct RegisterArgs {
    #[arg(long)]
    pub nome: String,
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub senha: String,
    #[arg(long, help = "Postal code (CEP), 8 digits")]
    pub cep: String,
    #[arg(long, help = "Accept the privacy terms (LGPD)")]
    pub accept_privacy: bool,
}

impl RegisterArgs {
    fn form(&self) -> RegistrationForm {
        RegistrationForm {
            nome: self.nome.clone(),
            email: self.email.clone(),
            senha: self.senha.clone(),
            cep: self.cep.clone(),
            consent: self.accept_privacy,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a customer account
    Register(RegisterArgs),
    /// Create a vendor account
    RegisterVendor(RegisterArgs),
    /// Sign in
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        senha: String,
    },
    /// Sign out (listings are kept)
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Adopt the server's last active session
    Resume,
    /// Show your listings and the global list, optionally filtered by name
    List { query: Option<String> },
    /// Show only your listings
    Mine,
    /// Publish a new listing
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        category: String,
        #[arg(long, help = "Price, e.g. \"R$ 12,34\" or 1234 (cents)")]
        price: String,
        #[arg(long, help = "Image URI")]
        image: String,
        #[arg(long)]
        store: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Remove one of your listings by its position in `mine`
    Remove { position: usize },
    /// Remove one of your listings by id
    RemoveId { id: Uuid },
    /// Remove all of your listings
    Clear {
        #[arg(long, help = "Confirm removal")]
        yes: bool,
    },
    /// Remove a listing from the global list and every user's list
    Purge { position: usize },
    /// Show listing details by its position in `list`
    Show { position: usize },
    /// Vendor profile summary
    Profile,
    /// List product categories
    Categories,
    /// List stores
    Stores,
}

impl Command {
    /// Commands after which earlier `list` positions no longer hold
    fn invalidates_shown(&self) -> bool {
        matches!(
            self,
            Command::Login { .. }
                | Command::Logout
                | Command::Resume
                | Command::Add { .. }
                | Command::Remove { .. }
                | Command::RemoveId { .. }
                | Command::Clear { .. }
                | Command::Purge { .. }
        )
    }
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct ReplLine {
    #[command(subcommand)]
    command: Command,
}

pub fn run_command(ctx: &Context, command: Command) -> Result<()> {
    let previous = if command.invalidates_shown() {
        ctx.last_shown.borrow_mut().take()
    } else {
        None
    };

    match command {
        Command::Register(args) => {
            ctx.auth().register(&args.form(), AccountKind::Customer)?;
            println!("Account created for {}. Log in to continue.", args.nome.trim());
        }
        Command::RegisterVendor(args) => {
            ctx.auth().register(&args.form(), AccountKind::Vendor)?;
            println!("Vendor account created for {}. Log in to continue.", args.nome.trim());
        }
        Command::Login { email, senha } => {
            let user = ctx.auth().login(&email, &senha)?;
            println!("Welcome back, {}!", display_name(&user));
        }
        Command::Logout => {
            ctx.auth().logout()?;
            println!("Signed out");
        }
        Command::Whoami => match session::current_user(ctx.kv.as_ref()) {
            Some(user) => println!("{} <{}>", display_name(&user), user.email),
            None => println!("Not signed in"),
        },
        Command::Resume => match ctx.auth().resume()? {
            Some(user) => println!("Resumed session for {}", user.email),
            None => println!("No session to resume"),
        },
        Command::List { query } => {
            let user = session::current_user(ctx.kv.as_ref());
            let all = ctx.listings().display_list(user.as_ref());
            let shown: Vec<Product> = listing::search(&all, query.as_deref().unwrap_or(""))
                .into_iter()
                .cloned()
                .collect();
            if shown.is_empty() {
                println!("No listings found");
            } else {
                print_listings(&shown);
            }
            *ctx.last_shown.borrow_mut() = Some(shown);
        }
        Command::Mine => {
            let user = require_user(ctx)?;
            let mine = ctx.listings().read_list(&user.products_key());
            if mine.is_empty() {
                println!("You have no listings yet");
            } else {
                print_listings(&mine);
            }
        }
        Command::Add {
            name,
            category,
            price,
            image,
            store,
            description,
        } => {
            let user = session::current_user(ctx.kv.as_ref());
            let draft = ProductDraft {
                image: Some(image),
                name,
                category,
                price,
                description,
                store,
            };
            let report = ctx.listings().publish(user.as_ref(), draft)?;
            match report.user_list {
                AppendOutcome::Added => println!(
                    "Published {} ({})",
                    report.product.name,
                    report.product.display_price()
                ),
                AppendOutcome::AlreadyPresent => {
                    println!("{} is already in your listings", report.product.name)
                }
            }
        }
        Command::Remove { position } => {
            let user = require_user(ctx)?;
            let removed = ctx
                .listings()
                .remove_at(&user.products_key(), to_index(position)?)?;
            println!("Removed {}", removed.name);
        }
        Command::RemoveId { id } => {
            let user = require_user(ctx)?;
            let removed = ctx.listings().remove_by_id(&user.products_key(), id)?;
            println!("Removed {}", removed.name);
        }
        Command::Clear { yes } => {
            let user = require_user(ctx)?;
            if !yes {
                println!("This removes all of your listings. Re-run with --yes to confirm.");
                return Ok(());
            }
            ctx.listings().clear(&user.products_key())?;
            println!("All of your listings were removed");
        }
        Command::Purge { position } => purge(ctx, previous, position)?,
        Command::Show { position } => {
            let product = shown_at(ctx.last_shown.borrow().as_deref(), position)?;
            print_detail(&product);
        }
        Command::Profile => {
            let user = require_user(ctx)?;
            let count = ctx.listings().count(&user.products_key());
            println!("{}", display_name(&user));
            println!("  E-mail:   {}", user.email);
            if let Some(role) = &user.role {
                println!("  Role:     {}", role);
            }
            println!("  Listings: {}", count);
        }
        Command::Categories => {
            let (list, source) = catalog::categories(ctx.api.as_ref());
            print_source(source);
            for c in list {
                println!("  {:>3}  {}", c.id, c.name);
            }
        }
        Command::Stores => {
            let (list, source) = catalog::stores(ctx.api.as_ref());
            print_source(source);
            for s in list {
                println!("  {:>3}  {}", s.id, s.name);
            }
        }
    }
    Ok(())
}

fn purge(ctx: &Context, shown: Option<Vec<Product>>, position: usize) -> Result<()> {
    let target = shown_at(shown.as_deref(), position)?;
    let report = ctx.listings().remove_everywhere(&target)?;
    if !report.global_changed && report.user_lists_changed == 0 {
        println!("{} was not found in any list", target.name);
    } else {
        println!(
            "Removed {} (global list: {}, user lists: {})",
            target.name,
            if report.global_changed { "yes" } else { "no" },
            report.user_lists_changed
        );
    }
    Ok(())
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history = history_path();
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    println!("vitrine - type help for commands, exit to quit");

    loop {
        match rl.readline("vitrine> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                match line {
                    "exit" | "quit" => break,
                    "help" => {
                        print_help();
                        continue;
                    }
                    _ => {}
                }

                if let Err(e) = run_line(&ctx, line) {
                    eprintln!("Error: {}", e);
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = rl.save_history(path) {
            tracing::debug!(error = %e, "failed to save history");
        }
    }

    Ok(())
}

/// Tokenize a REPL line shell-style and run it as a subcommand
pub fn run_line(ctx: &Context, line: &str) -> Result<()> {
    let words = shell_words::split(line).map_err(|e| anyhow!("{}", e))?;
    let parsed = ReplLine::try_parse_from(words).map_err(|e| anyhow!("{}", e.render()))?;
    run_command(ctx, parsed.command)
}

fn print_help() {
    println!("Account:");
    println!("  register --nome N --email E --senha S --cep C --accept-privacy");
    println!("  register-vendor ...      - same fields, vendor account");
    println!("  login --email E --senha S");
    println!("  logout | whoami | resume | profile");
    println!("Listings:");
    println!("  list [query]             - your listings first, then everyone's");
    println!("  show <n>                 - details of the n-th listing from `list`");
    println!("  mine                     - only your listings");
    println!("  add --name N --category C --price P --image URI --store S [--description D]");
    println!("  remove <n>               - remove the n-th of your listings");
    println!("  remove-id <uuid>         - remove one of your listings by id");
    println!("  clear --yes              - remove all of your listings");
    println!("  purge <n>                - remove the n-th listing from `list` everywhere");
    println!("Lookups:");
    println!("  categories | stores");
    println!("  help | exit");
}

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join("history"))
}

fn require_user(ctx: &Context) -> Result<session::User> {
    session::current_user(ctx.kv.as_ref()).ok_or_else(|| listing::ListingError::NotSignedIn.into())
}

/// Positions on screen are 1-based
fn to_index(position: usize) -> Result<usize> {
    position
        .checked_sub(1)
        .ok_or_else(|| anyhow!("positions start at 1"))
}

fn shown_at(shown: Option<&[Product]>, position: usize) -> Result<Product> {
    let index = to_index(position)?;
    let list = shown.ok_or_else(|| anyhow!("run `list` first to pick a listing by position"))?;
    list.get(index)
        .cloned()
        .ok_or_else(|| anyhow!("no listing at position {} ({} shown)", position, list.len()))
}

fn display_name(user: &session::User) -> &str {
    if user.nome.trim().is_empty() {
        &user.email
    } else {
        &user.nome
    }
}

fn print_source(source: Source) {
    if source == Source::Fallback {
        println!("(API unavailable, showing built-in list)");
    }
}

fn print_listings(list: &[Product]) {
    for (i, p) in list.iter().enumerate() {
        let store = p.store.as_deref().unwrap_or("-");
        println!(
            "{:>3}. {}  {}  [{}]  @ {}",
            i + 1,
            p.name,
            p.display_price(),
            p.category,
            store
        );
    }
}

fn print_detail(p: &Product) {
    println!("{}", p.name);
    println!("  Price:       {}", p.display_price());
    println!("  Category:    {}", p.category);
    if let Some(store) = &p.store {
        println!("  Store:       {}", store);
    }
    if let Some(desc) = p.description.as_deref().filter(|d| !d.is_empty()) {
        println!("  Description: {}", desc);
    }
    if let Some(image) = p.image.as_deref().filter(|i| !i.is_empty()) {
        println!("  Image:       {}", image);
    }
    if let Some(id) = p.id {
        println!("  Id:          {}", id);
    }
    if let Some(created) = p.created_at {
        println!("  Listed:      {}", created.format("%Y-%m-%d %H:%M UTC"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, Method};
    use crate::kv::MemoryStore;
    use serde_json::Value;

    struct Offline;

    impl ApiClient for Offline {
        fn request(&self, _: Method, _: Option<&Value>, _: &str) -> Result<Value, ApiError> {
            Err(ApiError::Transport("offline".to_string()))
        }
    }

    fn ctx() -> Context {
        Context::new(
            Config::default(),
            Box::new(MemoryStore::new()),
            Box::new(Offline),
        )
    }

    #[test]
    fn test_repl_line_parsing() {
        let parsed = ReplLine::try_parse_from(
            shell_words::split("add --name 'Bike Caloi' --category Esportes --price 300 --image file:///b.jpg --store Extra").unwrap(),
        )
        .unwrap();
        match parsed.command {
            Command::Add { name, description, .. } => {
                assert_eq!(name, "Bike Caloi");
                assert_eq!(description, "");
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert!(ReplLine::try_parse_from(["remove", "x"]).is_err());
    }

    #[test]
    fn test_offline_session_flow() {
        let ctx = ctx();
        run_line(&ctx, "register --nome Ana --email ana@example.com --senha secret1 --cep 01310100 --accept-privacy").unwrap();
        run_line(&ctx, "login --email ana@example.com --senha secret1").unwrap();
        run_line(&ctx, "add --name Bike --category Esportes --price 30000 --image file:///b.jpg --store Extra").unwrap();
        run_line(&ctx, "add --name Lamp --category Casa --price 1000 --image file:///l.jpg --store Extra").unwrap();

        let user = session::current_user(ctx.kv.as_ref()).unwrap();
        let mine = ctx.listings().read_list(&user.products_key());
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].name, "Lamp");
        assert_eq!(mine[1].price, "300.00");

        run_line(&ctx, "remove 1").unwrap();
        assert_eq!(ctx.listings().count(&user.products_key()), 1);
        assert!(run_line(&ctx, "remove 0").is_err());
        assert!(run_line(&ctx, "remove 5").is_err());

        run_line(&ctx, "list bike").unwrap();
        assert_eq!(ctx.last_shown.borrow().as_ref().map(Vec::len), Some(1));
        run_line(&ctx, "purge 1").unwrap();
        assert!(ctx.listings().global_list().iter().all(|p| p.name != "Bike"));
        assert_eq!(ctx.listings().count(&user.products_key()), 0);

        run_line(&ctx, "logout").unwrap();
        assert!(session::current_user(ctx.kv.as_ref()).is_none());
    }

    #[test]
    fn test_positions_refer_to_last_shown_list() {
        let ctx = ctx();
        session::sign_in(ctx.kv.as_ref(), &session::User::new("Ana", "ana@example.com"), "t")
            .unwrap();
        run_line(&ctx, "add --name Bike --category Esportes --price 1 --image i --store Extra").unwrap();

        // Nothing listed yet
        assert!(run_line(&ctx, "show 1").is_err());
        assert!(run_line(&ctx, "purge 1").is_err());

        // An empty search leaves nothing to pick from
        run_line(&ctx, "list zzz-no-match").unwrap();
        let err = run_line(&ctx, "purge 1").unwrap_err();
        assert!(err.to_string().contains("0 shown"));
        assert_eq!(ctx.listings().global_list().len(), 1);

        // Adding a listing invalidates the earlier positions
        run_line(&ctx, "list").unwrap();
        run_line(&ctx, "show 1").unwrap();
        run_line(&ctx, "add --name Lamp --category Casa --price 2 --image l --store Extra").unwrap();
        assert!(ctx.last_shown.borrow().is_none());
        assert!(run_line(&ctx, "purge 1").is_err());
        assert_eq!(ctx.listings().global_list().len(), 2);
    }

    #[test]
    fn test_mutations_require_login() {
        let ctx = ctx();
        let err = run_line(&ctx, "add --name Bike --category Esportes --price 1 --image i --store Extra")
            .unwrap_err();
        assert!(err.to_string().contains("log in"));
        assert!(run_line(&ctx, "mine").is_err());
        assert!(run_line(&ctx, "clear --yes").is_err());
    }

    #[test]
    fn test_clear_needs_confirmation() {
        let ctx = ctx();
        session::sign_in(ctx.kv.as_ref(), &session::User::new("Ana", "ana@example.com"), "t")
            .unwrap();
        run_line(&ctx, "add --name Bike --category Esportes --price 1 --image i --store Extra").unwrap();

        run_line(&ctx, "clear").unwrap();
        assert_eq!(ctx.listings().count("products:ana@example.com"), 1);
        run_line(&ctx, "clear --yes").unwrap();
        assert_eq!(ctx.listings().count("products:ana@example.com"), 0);
        // The global list is untouched by clear
        assert_eq!(ctx.listings().global_list().len(), 1);
    }
}
