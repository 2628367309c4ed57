// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Scanner Library
 * Template-driven vulnerability scanner engine
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */
pub mod cli;
pub mod cluster;
pub mod context;
pub mod dsl;
pub mod errors;
pub mod executor;
pub mod extractors;
pub mod host_errors;
pub mod input;
pub mod interactsh;
pub mod matchers;
pub mod options;
pub mod output;
pub mod payloads;
pub mod rate_limiter;
pub mod resume;
pub mod template;
pub mod types;
pub mod workflow;

// Protocol drivers
pub mod protocols;

// Scan engine / scheduler
pub mod engine;
