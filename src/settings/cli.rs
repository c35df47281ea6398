use super::Parser;
use crate::domain_model::{PostId, TimePeriod, UserId};
use clap::Subcommand;

#[derive(Parser, Debug)]
#[command(name = "elevate", about = "ElevateU campus feed client")]
pub struct Cli {
    #[arg(long)]
    pub settings: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account; the server mails a one-time code.
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        field: Option<String>,
    },
    /// Trade the mailed code for a session.
    Verify {
        #[arg(long)]
        email: String,
        #[arg(long)]
        otp: String,
    },
    /// Sign in and keep the tokens in the credential store.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    /// Show what the stored session looks like.
    Status,
    Feed,
    Post {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },
    Delete {
        post: PostId,
    },
    Like {
        post: PostId,
    },
    Unlike {
        post: PostId,
    },
    Comment {
        post: PostId,
        text: String,
    },
    Comments {
        post: PostId,
    },
    Follow {
        user: UserId,
    },
    Unfollow {
        user: UserId,
    },
    Profile {
        user: UserId,
    },
    Followers {
        user: UserId,
    },
    Following {
        user: UserId,
    },
    Leaderboard {
        #[arg(long, default_value = "academics")]
        field: String,
        #[arg(long, default_value = "ALL_TIME")]
        period: TimePeriod,
    },
}
