//! Topic commands.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::http::{get_json, post_json_body};
use super::status::short;

#[derive(Deserialize)]
struct TopicListResponse {
    topics: Vec<String>,
}

#[derive(Serialize)]
struct CreateTopicRequest<'a> {
    #[serde(rename = "topicName")]
    topic_name: &'a str,
}

#[derive(Deserialize)]
struct CreateTopicResponse {
    topic: String,
}

#[derive(Deserialize)]
struct TopicInfo {
    topic: String,
    connected: bool,
    peers: Vec<String>,
    age_secs: u64,
}

#[derive(Deserialize)]
struct TopicPeersResponse {
    peers: Vec<String>,
}

pub async fn cmd_topics(base: &str) -> Result<()> {
    let resp: TopicListResponse = get_json(&format!("{}/topics", base)).await?;

    if resp.topics.is_empty() {
        println!("No topics joined.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Topics ({})", resp.topics.len());
    println!("═══════════════════════════════════════");
    for topic in &resp.topics {
        println!("  {}", topic);
    }

    Ok(())
}

pub async fn cmd_create(base: &str, name: &str) -> Result<()> {
    let resp: CreateTopicResponse = post_json_body(
        &format!("{}/topics", base),
        &CreateTopicRequest { topic_name: name },
    )
    .await?;
    println!("Joined topic {}.", resp.topic);
    Ok(())
}

pub async fn cmd_topic_info(base: &str, name: &str) -> Result<()> {
    let resp: TopicInfo = get_json(&format!("{}/topics/{}", base, name)).await?;

    println!("═══════════════════════════════════════");
    println!("  Topic {}", resp.topic);
    println!("═══════════════════════════════════════");
    println!("  Socket attached : {}", if resp.connected { "yes" } else { "no" });
    println!("  Age             : {}s", resp.age_secs);

    if resp.peers.is_empty() {
        println!("\n  No remote subscribers.");
    } else {
        println!("\n  Remote subscribers:");
        for peer in &resp.peers {
            println!("    {}", short(peer));
        }
    }

    Ok(())
}

pub async fn cmd_topic_peers(base: &str, name: &str) -> Result<()> {
    let resp: TopicPeersResponse = get_json(&format!("{}/topics/{}/peers", base, name)).await?;

    if resp.peers.is_empty() {
        println!("No remote subscribers on {}.", name);
        return Ok(());
    }
    for peer in &resp.peers {
        println!("{}", peer);
    }
    Ok(())
}
