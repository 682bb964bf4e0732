use std::fs::File;

use crate::decoder::DecoderConfig;
use crate::parser::Parser;
use crate::sentence::Sentence;
use crate::solver::RootPolicy;
use crate::trainer::{Corpus, Trainer, TrainerConfig};

fn trained() -> (Parser, Corpus) {
    let config =
        TrainerConfig::from_reader(File::open("src/tests/resources/feature.def").unwrap()).unwrap();
    let corpus =
        Corpus::from_reader(File::open("src/tests/resources/corpus.conll").unwrap()).unwrap();
    let parser = Trainer::new(config).epochs(3).train(corpus.clone()).unwrap();
    (parser, corpus)
}

#[test]
fn test_write_read() {
    let (parser, corpus) = trained();

    let mut data = vec![];
    parser.write(&mut data).unwrap();
    let reloaded = Parser::read(data.as_slice()).unwrap();

    assert_eq!(parser.decoder_config(), reloaded.decoder_config());
    assert_eq!(parser.num_features(), reloaded.num_features());
    for example in corpus.iter() {
        assert_eq!(
            parser.parse(example.sentence()).unwrap(),
            reloaded.parse(example.sentence()).unwrap()
        );
    }
}

#[test]
fn test_read_corrupted() {
    let (parser, _) = trained();
    let mut data = vec![];
    parser.write(&mut data).unwrap();
    data.truncate(data.len() / 2);
    assert!(Parser::read(data.as_slice()).is_err());
}

#[test]
fn test_parse_batch() {
    let (parser, corpus) = trained();
    let sentences: Vec<Sentence> = corpus.iter().map(|e| e.sentence().clone()).collect();
    let batch = parser.parse_batch(&sentences).unwrap();
    assert_eq!(sentences.len(), batch.len());
    for (sentence, heads) in sentences.iter().zip(&batch) {
        assert_eq!(&parser.parse(sentence).unwrap(), heads);
    }
}

#[test]
fn test_parse_unknown_words() {
    let (parser, _) = trained();
    let sentence: Sentence = [("Zorg", "XX"), ("blicks", "YY"), ("quux", "ZZ")]
        .into_iter()
        .collect();
    let (heads, report) = parser.parse_with_report(&sentence).unwrap();
    assert_eq!(3, heads.len());
    assert_eq!(1, heads.iter().filter(|h| h.is_none()).count());
    assert_eq!(report.steps as usize + 1, report.best_trace.len());
}

#[test]
fn test_parse_short_sentences() {
    let (parser, _) = trained();
    assert!(parser.parse(&Sentence::new()).unwrap().is_empty());
    let one: Sentence = [("Hi", "UH")].into_iter().collect();
    assert_eq!(vec![None], parser.parse(&one).unwrap());
}

#[test]
fn test_fixed_root() {
    let (mut parser, corpus) = trained();
    parser
        .set_decoder_config(DecoderConfig {
            root_policy: RootPolicy::Fixed(0),
            ..*parser.decoder_config()
        })
        .unwrap();
    let heads = parser.parse(corpus[0].sentence()).unwrap();
    assert_eq!(None, heads[0]);
    assert!(heads[1..].iter().all(|h| h.is_some()));
}
