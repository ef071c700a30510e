use serde_json::{json, Value};

/// The branch of the defaults tree that repeats once per run.
pub const RUN_BRANCH: &str = "run";

/// Keys whose values are free-form and replaced as a whole by an override.
pub const FREE_FORM_KEYS: &[&str] = &[
    "train_batch_kwargs",
    "valid_batch_kwargs",
    "train_tensor_schedule",
    "validation_tensor_schedule",
    "train_print_tensors",
    "train_save_tensors",
    "valid_print_tensors",
];

/// The default arguments of a training session.
///
/// `start_specs` is fixed for the whole session, `run` is resolved once per run.
pub fn train_defaults() -> Value {
    json!({
        "start_specs": {
            "restore_path": null,
            "save_path": null,
            "result_types": ["loss", "perplexity", "accuracy", "bpc"]
        },
        "run": {
            "train_specs": {
                "learning_rate": {
                    "type": "exponential_decay",
                    "init": 0.002,
                    "decay": 0.8,
                    "period": 1000,
                    "name": "learning_rate"
                },
                "additions_to_feed_dict": null,
                "stop": {"type": "limit_steps", "limit": 10000, "name": "stop"},
                "train_dataset": null,
                "batch_size": {"type": "fixed", "value": 64, "name": "batch_size"},
                "train_batch_kwargs": {},
                "checkpoint_steps": null,
                "debug": null,
                "validation_datasets": [],
                "validation_batch_size": 1,
                "valid_batch_kwargs": {}
            },
            "schedule": {
                "to_be_collected_while_training": {
                    "results_collect_interval": 100,
                    "print_per_collected": 1,
                    "example_per_print": 1
                },
                "printed_result_types": ["loss"],
                "printed_controllers": ["learning_rate"],
                "train_tensor_schedule": {
                    "train_print_tensors": {},
                    "train_save_tensors": {}
                },
                "validation_tensor_schedule": {
                    "valid_print_tensors": {}
                }
            }
        }
    })
}
