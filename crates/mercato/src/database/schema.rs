/*
 *  Copyright 2025-2026 Mercato Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Unified Diesel schema shared by the PostgreSQL and SQLite backends.
//!
//! Ids are `Binary` (16 raw UUID bytes), timestamps are `Timestamp`,
//! statuses and enums are `Text`. Every tenant-owned table carries a
//! `tenant_id` column; the DAL filters on it in every query.

diesel::table! {
    batches (id) {
        id -> Binary,
        tenant_id -> Text,
        batch_key -> Text,
        marketplace -> Text,
        action -> Text,
        status -> Text,
        total_count -> Integer,
        completed_count -> Integer,
        failed_count -> Integer,
        cancelled_count -> Integer,
        priority -> Integer,
        cancelled_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    jobs (id) {
        id -> Binary,
        tenant_id -> Text,
        marketplace -> Text,
        action -> Text,
        target_entity_id -> Nullable<Text>,
        batch_id -> Nullable<Binary>,
        status -> Text,
        priority -> Integer,
        retry_count -> Integer,
        max_retries -> Integer,
        expires_at -> Timestamp,
        retry_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        input -> Text,
        result -> Nullable<Text>,
        idempotency_key -> Nullable<Text>,
        error_message -> Nullable<Text>,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    tasks (id) {
        id -> Binary,
        tenant_id -> Text,
        job_id -> Binary,
        kind -> Text,
        description -> Text,
        position -> Integer,
        status -> Text,
        payload -> Text,
        result -> Nullable<Text>,
        method -> Nullable<Text>,
        path -> Nullable<Text>,
        carrier -> Nullable<Text>,
        retry_count -> Integer,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        error_message -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::joinable!(tasks -> jobs (job_id));
diesel::joinable!(jobs -> batches (batch_id));

diesel::allow_tables_to_appear_in_same_query!(batches, jobs, tasks);
