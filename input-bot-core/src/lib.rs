#![doc = "input-bot-core: core pipeline library for input-bot."]

//! This crate turns items from external sources (feeds, citation libraries,
//! tool catalogs, video channels) into Markdown posts and proposes the new
//! ones to a content repository as a single pull request.
//!
//! # Pipeline
//! - [`normalize`]: raw item + source template → [`normalize::Entry`]
//! - [`index`]: paths already published or pending review
//! - [`publish`]: accept or reject an entry, staging accepted content
//! - [`batch`]: one pull request for everything accepted in a run
//! - [`synchronise`]: drives a whole run
//!
//! Source adapters live in [`sources`]; the repository backend is supplied by
//! the caller through [`contract::Repository`].

pub mod batch;
pub mod config;
pub mod contract;
pub mod index;
pub mod normalize;
pub mod publish;
pub mod sources;
pub mod synchronise;
