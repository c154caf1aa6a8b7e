use std::thread;

use ml_backends::{BagConfig, BagOfEmbeddings, DistributedModel, HashingTokenizer, ThreadGroup};
use ml_core::{Instance, Label, ModelBackend, TaskId, Tokenizer};

fn encode(tok: &HashingTokenizer, text: &str, class: usize) -> Instance {
    let enc = tok.encode(text, None, 8);
    Instance {
        input_ids: enc.input_ids,
        attention_mask: enc.attention_mask,
        token_type_ids: Some(enc.token_type_ids),
        label: Label::Class(class),
        task: TaskId(0),
    }
}

#[test]
fn replicas_stay_identical_after_averaged_updates() {
    let tok = HashingTokenizer::new(64, true).unwrap();
    let shards = [
        vec![encode(&tok, "good film", 1), encode(&tok, "bad plot", 0)],
        vec![encode(&tok, "great acting", 1), encode(&tok, "dull scenes", 0)],
    ];

    let group = ThreadGroup::new_group(2).unwrap();
    let handles: Vec<_> = group
        .into_iter()
        .zip(shards)
        .map(|(member, shard)| {
            thread::spawn(move || {
                let model = BagOfEmbeddings::new(BagConfig::new(64, 8, [2]), 3).unwrap();
                let mut model = DistributedModel::new(model, member);
                let batch: Vec<&Instance> = shard.iter().collect();

                for _ in 0..3 {
                    model.forward_backward(&batch, 2, 1.0).unwrap();
                    model.sync_gradients().unwrap();
                    for p in model.params() {
                        p.values.iter_mut().zip(p.grads.iter()).for_each(|(v, g)| *v -= 0.1 * g);
                    }
                    model.zero_grad();
                }

                model
                    .params()
                    .into_iter()
                    .flat_map(|p| p.values.to_vec())
                    .collect::<Vec<f32>>()
            })
        })
        .collect();

    let weights: Vec<Vec<f32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(weights[0], weights[1]);
}
