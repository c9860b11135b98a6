// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Remote file-hosting service client.
//!
//! [`RemoteFileService`] is the capability a download worker needs: resolve
//! metadata, obtain a short-lived direct link, then stream bytes from an
//! offset. [`OneFichierClient`] implements it over reqwest, and a
//! [`ClientFactory`] builds one per credential.

mod client;
mod config;
mod error;
mod types;

pub use client::{ClientFactory, OneFichierClient, OneFichierClientFactory, RemoteFileService};
pub use config::RemoteConfig;
pub use error::{RemoteError, Result};
pub use types::{DownloadToken, FileInfo, RemoteBody, TOKEN_STATUS_OK};
