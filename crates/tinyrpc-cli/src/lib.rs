// Copyright 2025 tinyrpc Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # tinyrpc CLI
//!
//! Runs the pieces of a tinyrpc deployment from the command line:
//!
//! - **Registry**: the HTTP service servers heartbeat into
//! - **Server**: an RPC server exposing the demo `Foo` service
//! - **Call**: a one-shot call through discovery and load balancing
//!
//! The CLI uses `argh` for argument parsing and wires together
//! `tinyrpc-registry`, `tinyrpc-server` and `tinyrpc-xclient`.

pub mod demo;
