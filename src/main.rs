use elevate::application_port::*;
use elevate::client::*;
use elevate::domain_model::*;
use elevate::logger::*;
use elevate::settings::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    debug!(?project_settings);
    let logger_config = LogConfig {
        filter: project_settings.log.filter.clone(),
    };
    logger.reload_from_config(&logger_config)?;

    let client = Client::try_new(&project_settings).await?;
    run(&client, cli.command).await
}

async fn run(client: &Client, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Register {
            username,
            email,
            password,
            field,
        } => {
            let user = client
                .session_service
                .register(RegisterInput {
                    username,
                    email,
                    password2: password.clone(),
                    password,
                    field_of_interest: field,
                    first_name: None,
                    last_name: None,
                })
                .await?;
            println!("registered {} (id {}), check your email for the code", user.username, user.id);
        }
        Command::Verify { email, otp } => {
            client.session_service.verify_email(&email, &otp).await?;
            let user = client.session_service.current_user().await?;
            println!("verified, signed in as {}", user.display_name());
        }
        Command::Login { email, password } => {
            client
                .session_service
                .login(LoginInput { email, password })
                .await?;
            let user = client.session_service.current_user().await?;
            println!("signed in as {}", user.display_name());
        }
        Command::Logout => {
            client.logout().await?;
            println!("signed out");
        }
        Command::Whoami => {
            let user = client.session_service.current_user().await?;
            println!("{} <{}> (id {})", user.display_name(), user.email, user.id);
        }
        Command::Status => print_status(client),
        Command::Feed => {
            for post in client.feed_service.load().await? {
                print_post(&post);
            }
        }
        Command::Post {
            title,
            description,
            category,
            image,
        } => {
            let post = client
                .feed_service
                .create_post(NewPost {
                    title,
                    description,
                    category,
                    image,
                })
                .await?;
            print_post(&post);
        }
        Command::Delete { post } => {
            client.feed_service.delete_post(post).await?;
            println!("deleted post {post}");
        }
        Command::Like { post } => {
            client.feed_service.like_post(post).await?;
            println!("liked post {post}");
        }
        Command::Unlike { post } => {
            client.feed_service.unlike_post(post).await?;
            println!("unliked post {post}");
        }
        Command::Comment { post, text } => {
            let comment = client.feed_service.add_comment(post, text).await?;
            println!("comment {} added to post {}", comment.id.0, comment.post);
        }
        Command::Comments { post } => {
            for comment in client.engagement_service.comments(post).await? {
                println!("{}  {}", comment.created_at.format("%Y-%m-%d %H:%M"), comment.text);
            }
        }
        Command::Follow { user } => {
            client.engagement_service.follow(user).await?;
            println!("following user {user}");
        }
        Command::Unfollow { user } => {
            client.engagement_service.unfollow(user).await?;
            println!("unfollowed user {user}");
        }
        Command::Profile { user } => {
            let profile = client.engagement_service.profile(user).await?;
            println!("{} (id {})", profile.username, profile.id);
            if let Some(name) = profile.full_name() {
                println!("name: {name}");
            }
            if let Some(field) = &profile.field_of_interest {
                println!("field: {field}");
            }
            if let Some(bio) = &profile.bio {
                println!("bio: {bio}");
            }
            println!("campus verified: {}", profile.campus_verified);
        }
        Command::Followers { user } => {
            print_users(&client.engagement_service.followers(user).await?);
        }
        Command::Following { user } => {
            print_users(&client.engagement_service.following(user).await?);
        }
        Command::Leaderboard { field, period } => {
            let entries = client.engagement_service.leaderboard(&field, period).await?;
            if entries.is_empty() {
                println!("no rankings for {} ({})", field, period.as_str());
            }
            for entry in entries {
                println!("{:>3}. {:<20} {:>6}", entry.rank, entry.username, entry.score);
            }
        }
    }
    Ok(())
}

fn print_status(client: &Client) {
    let session = client.session().session();
    println!("signed in: {}", client.session_service.is_authenticated());
    println!("refresh token: {}", session.refresh_token().is_some());
    let claims = session.access_token().and_then(AccessToken::claims);
    match claims.as_ref().and_then(TokenClaims::expires_at) {
        Some(expires_at) => println!("access token expires: {expires_at}"),
        None => println!("access token expires: unknown"),
    }
    if let Some(user) = claims.and_then(|claims| claims.user_id) {
        println!("user id: {user}");
    }
}

fn print_post(post: &Post) {
    println!(
        "{:>8}  {:<12} likes={:<3} comments={:<3} {}",
        post.key.to_string(),
        post.author,
        post.like_count,
        post.comment_count,
        post.title
    );
}

fn print_users(users: &[UserProfile]) {
    if users.is_empty() {
        println!("nobody yet");
    }
    for user in users {
        println!("{:>6}  {}", user.id, user.username);
    }
}
